//! Concrete ability definitions

use crate::define_ability;

define_ability! {
    /// Base item identity
    pub struct AbItem => BITEM("BItem") {
        get_id / with_id: String = "id",
        get_layer / with_layer: String = "layer",
        get_state / with_state: String = "state",
    }
}

define_ability! {
    /// Loadable asset backing an item
    pub struct AbAssembly => ASSEMBLY("Assembly") {
        get_asset_url / with_asset_url: String = "assetUrl",
        /// Loader to use, e.g. "gltf"
        get_asset_loader / with_asset_loader: String = "assetLoader",
        get_asset_auth / with_asset_auth: String = "assetAuth",
        get_asset_representation / with_asset_representation: String = "assetRepresentation",
    }
}

define_ability! {
    /// Placement of an item in the scene
    pub struct AbInstance => INSTANCE("Instance") {
        /// `SELF` or the id of the item holding the geometry
        get_ref_item / with_ref_item: String = "refItem",
        get_pos / with_pos: NumberArray = "pos",
        get_rot / with_rot: NumberArray = "rot",
        /// Coordinate system code of `pos`
        get_pos_ref / with_pos_ref: Number = "posRef",
        /// Rotation system code of `rot`
        get_rot_ref / with_rot_ref: Number = "rotRef",
    }
}

define_ability! {
    /// Viewer camera pose and mode
    pub struct AbCamera => CAMERA("Camera") {
        get_pos / with_pos: NumberArray = "pos",
        get_pos_to / with_pos_to: NumberArray = "posTo",
        get_rot / with_rot: NumberArray = "rot",
        get_rot_to / with_rot_to: NumberArray = "rotTo",
        get_for / with_for: Number = "for",
        get_camera_index / with_camera_index: Number = "cameraIndex",
        /// See [`CameraMode`]
        get_camera_mode / with_camera_mode: Number = "cameraMode",
        get_camera_target / with_camera_target: NumberArray = "cameraTarget",
        get_camera_target_avatar_id / with_camera_target_avatar_id: String = "cameraTargetAvatarId",
        // Key spelling is fixed by deployed peers.
        get_camera_displacement / with_camera_displacement: NumberArray = "camerDisplacement",
    }
}

define_ability! {
    /// Session negotiation values
    pub struct AbOpenSession => OPEN_SESSION("OpenSession") {
        get_client_auth / with_client_auth: String = "clientAuth",
        get_server_version / with_server_version: String = "serverVersion",
        get_server_auth / with_server_auth: String = "serverAuth",
    }
}

/// Camera behaviour carried in `cameraMode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CameraMode {
    /// Not specified
    #[default]
    Unknown,
    /// Eye view
    FirstPerson,
    /// Behind the avatar
    ThirdPerson,
    /// Unattached
    FreeLook,
    /// Circling a target
    Orbit,
    /// Trailing a target
    Follow,
}

impl CameraMode {
    /// Wire value
    pub fn code(self) -> f64 {
        match self {
            Self::Unknown => 0.0,
            Self::FirstPerson => 1.0,
            Self::ThirdPerson => 2.0,
            Self::FreeLook => 3.0,
            Self::Orbit => 4.0,
            Self::Follow => 5.0,
        }
    }

    /// Decode a wire value; anything unrecognized is [`CameraMode::Unknown`]
    pub fn from_code(code: f64) -> Self {
        match code as i64 {
            1 => Self::FirstPerson,
            2 => Self::ThirdPerson,
            3 => Self::FreeLook,
            4 => Self::Orbit,
            5 => Self::Follow,
            _ => Self::Unknown,
        }
    }
}

impl AbCamera {
    /// Set `cameraMode` from a [`CameraMode`]
    pub fn with_mode(self, mode: CameraMode) -> Self {
        self.with_camera_mode(mode.code())
    }

    /// Read `cameraMode` as a [`CameraMode`]
    pub fn get_mode(props: &crate::PropertyBag) -> Option<CameraMode> {
        Self::get_camera_mode(props).map(CameraMode::from_code)
    }
}
