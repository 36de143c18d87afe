//! Ability descriptors and the ability collector
//!
//! An ability is a named, fixed set of property keys. Values set on an
//! [`Ability`] are staged until the ability is added to an [`AbilityList`],
//! which records the name in the reserved [`ABILITIES_PROP`] sequence and
//! copies the staged values into the bag.

use crate::{PropertyBag, PropertyKind, PropertyValue, ProtocolError};

/// Reserved property listing attached ability names in attachment order
pub const ABILITIES_PROP: &str = "abilities";

/// One declared key of an ability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    /// Property bag key
    pub key: &'static str,
    /// Value kind stored under the key
    pub kind: PropertyKind,
}

/// Name and key set of an ability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbilityDescriptor {
    /// Ability name as recorded in [`ABILITIES_PROP`]
    pub name: &'static str,
    /// Declared keys, in declaration order
    pub properties: &'static [PropertySpec],
}

impl AbilityDescriptor {
    /// Find the declaration for a key
    pub fn property(&self, key: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|spec| spec.key == key)
    }
}

/// Values staged for one ability
#[derive(Debug, Clone, PartialEq)]
pub struct Ability {
    descriptor: &'static AbilityDescriptor,
    props: PropertyBag,
}

impl Ability {
    /// Create an ability with no values set
    pub fn new(descriptor: &'static AbilityDescriptor) -> Self {
        Self {
            descriptor,
            props: PropertyBag::new(),
        }
    }

    /// Ability name
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// The ability's declaration
    pub fn descriptor(&self) -> &'static AbilityDescriptor {
        self.descriptor
    }

    /// Values set so far
    pub fn properties(&self) -> &PropertyBag {
        &self.props
    }

    /// Set a declared key, checking the value kind
    pub fn set(&mut self, key: &str, value: impl Into<PropertyValue>) -> Result<(), ProtocolError> {
        let value = value.into();
        let spec = self
            .descriptor
            .property(key)
            .ok_or_else(|| ProtocolError::UnknownProperty {
                ability: self.descriptor.name,
                key: key.to_string(),
            })?;
        if spec.kind != value.kind() {
            return Err(ProtocolError::PropertyKind {
                key: key.to_string(),
                expected: spec.kind,
                actual: value.kind(),
            });
        }
        self.props.insert(spec.key, value);
        Ok(())
    }

    /// Read a value set on this ability
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.props.get(key)
    }

    #[doc(hidden)]
    pub fn insert_unchecked(&mut self, key: &'static str, value: PropertyValue) {
        self.props.insert(key, value);
    }
}

impl AsRef<Ability> for Ability {
    fn as_ref(&self) -> &Ability {
        self
    }
}

/// Collects abilities into a property bag
#[derive(Debug, Clone, PartialEq)]
pub struct AbilityList {
    names: Vec<String>,
    props: PropertyBag,
}

impl Default for AbilityList {
    fn default() -> Self {
        Self::new()
    }
}

impl AbilityList {
    /// Create a list with an empty [`ABILITIES_PROP`] sequence
    pub fn new() -> Self {
        let mut props = PropertyBag::new();
        props.insert(ABILITIES_PROP, PropertyValue::StringArray(Vec::new()));
        Self {
            names: Vec::new(),
            props,
        }
    }

    /// Attach an ability. Later additions overwrite earlier keys.
    pub fn add(&mut self, ability: impl AsRef<Ability>) -> &mut Self {
        let ability = ability.as_ref();
        self.names.push(ability.name().to_string());
        self.props.merge(ability.properties());
        self.props
            .insert(ABILITIES_PROP, PropertyValue::StringArray(self.names.clone()));
        self
    }

    /// Builder-style [`AbilityList::add`]
    pub fn with(mut self, ability: impl AsRef<Ability>) -> Self {
        self.add(ability);
        self
    }

    /// Attached ability names in attachment order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The merged bag
    pub fn properties(&self) -> &PropertyBag {
        &self.props
    }

    /// Consume the list, returning the merged bag
    pub fn into_properties(self) -> PropertyBag {
        self.props
    }
}

impl From<AbilityList> for PropertyBag {
    fn from(list: AbilityList) -> Self {
        list.props
    }
}

/// Ability names recorded in a bag
pub fn abilities_of(props: &PropertyBag) -> &[String] {
    props.get_strings(ABILITIES_PROP).unwrap_or(&[])
}

/// Define a typed ability.
///
/// Generates a static descriptor, a wrapper around [`Ability`] with a
/// `with_*` setter per key, and `get_*` accessors reading a property bag.
///
/// ```
/// use basil_proto::define_ability;
///
/// define_ability! {
///     /// A light source
///     pub struct AbLight => LIGHT("Light") {
///         get_color / with_color: String = "color",
///         get_intensity / with_intensity: Number = "intensity",
///     }
/// }
///
/// let light = AbLight::new().with_color("white").with_intensity(0.8);
/// assert_eq!(AbLight::get_color(light.properties()), Some("white"));
/// ```
#[macro_export]
macro_rules! define_ability {
    (
        $(#[$meta:meta])*
        $vis:vis struct $ty:ident => $descriptor:ident($name:literal) {
            $(
                $(#[$fmeta:meta])*
                $getter:ident / $setter:ident : $kind:ident = $key:literal,
            )*
        }
    ) => {
        #[doc = concat!("Descriptor of the `", $name, "` ability")]
        $vis static $descriptor: $crate::ability::AbilityDescriptor =
            $crate::ability::AbilityDescriptor {
                name: $name,
                properties: &[
                    $(
                        $crate::ability::PropertySpec {
                            key: $key,
                            kind: $crate::PropertyKind::$kind,
                        },
                    )*
                ],
            };

        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $ty($crate::ability::Ability);

        impl $ty {
            /// Ability name
            pub const NAME: &'static str = $name;

            /// Create with no values set
            pub fn new() -> Self {
                Self($crate::ability::Ability::new(&$descriptor))
            }

            /// Values set so far
            pub fn properties(&self) -> &$crate::PropertyBag {
                self.0.properties()
            }

            $(
                $crate::define_ability!(@accessors [$(#[$fmeta])*] $kind, $key, $getter, $setter);
            )*
        }

        impl ::core::default::Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::core::convert::AsRef<$crate::ability::Ability> for $ty {
            fn as_ref(&self) -> &$crate::ability::Ability {
                &self.0
            }
        }

        impl ::core::convert::From<$ty> for $crate::ability::Ability {
            fn from(value: $ty) -> Self {
                value.0
            }
        }
    };

    (@accessors [$(#[$fmeta:meta])*] String, $key:literal, $getter:ident, $setter:ident) => {
        #[doc = concat!("Set `", $key, "`")]
        $(#[$fmeta])*
        pub fn $setter(mut self, value: impl ::core::convert::Into<::std::string::String>) -> Self {
            self.0.insert_unchecked($key, $crate::PropertyValue::String(value.into()));
            self
        }

        #[doc = concat!("Read `", $key, "` from a property bag")]
        $(#[$fmeta])*
        pub fn $getter(props: &$crate::PropertyBag) -> ::core::option::Option<&str> {
            props.get_str($key)
        }
    };

    (@accessors [$(#[$fmeta:meta])*] Number, $key:literal, $getter:ident, $setter:ident) => {
        #[doc = concat!("Set `", $key, "`")]
        $(#[$fmeta])*
        pub fn $setter(mut self, value: f64) -> Self {
            self.0.insert_unchecked($key, $crate::PropertyValue::Number(value));
            self
        }

        #[doc = concat!("Read `", $key, "` from a property bag")]
        $(#[$fmeta])*
        pub fn $getter(props: &$crate::PropertyBag) -> ::core::option::Option<f64> {
            props.get_number($key)
        }
    };

    (@accessors [$(#[$fmeta:meta])*] StringArray, $key:literal, $getter:ident, $setter:ident) => {
        #[doc = concat!("Set `", $key, "`")]
        $(#[$fmeta])*
        pub fn $setter(mut self, value: ::std::vec::Vec<::std::string::String>) -> Self {
            self.0.insert_unchecked($key, $crate::PropertyValue::StringArray(value));
            self
        }

        #[doc = concat!("Read `", $key, "` from a property bag")]
        $(#[$fmeta])*
        pub fn $getter(props: &$crate::PropertyBag) -> ::core::option::Option<&[::std::string::String]> {
            props.get_strings($key)
        }
    };

    (@accessors [$(#[$fmeta:meta])*] NumberArray, $key:literal, $getter:ident, $setter:ident) => {
        #[doc = concat!("Set `", $key, "`")]
        $(#[$fmeta])*
        pub fn $setter(mut self, value: impl ::core::convert::Into<::std::vec::Vec<f64>>) -> Self {
            self.0.insert_unchecked($key, $crate::PropertyValue::NumberArray(value.into()));
            self
        }

        #[doc = concat!("Read `", $key, "` from a property bag")]
        $(#[$fmeta])*
        pub fn $getter(props: &$crate::PropertyBag) -> ::core::option::Option<&[f64]> {
            props.get_numbers($key)
        }
    };
}
