//! Format versions and the features each one enables.

use std::fmt;

use crate::error::SerializationError;

/// An adhoc binary format version.
///
/// Features accrete monotonically: each predicate below is a lower (or upper) bound on the version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AdhocVersion(u8);

impl AdhocVersion {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 15;

    pub fn new(version: u32) -> Result<Self, SerializationError> {
        if (Self::MIN as u32..=Self::MAX as u32).contains(&version) {
            Ok(Self(version as u8))
        } else {
            Err(SerializationError::UnsupportedVersion { version })
        }
    }
    pub fn get(self) -> u8 {
        self.0
    }

    pub fn has_symbol_table(self) -> bool { self.0 >= 9 }
    pub fn has_new_assign(self) -> bool { self.0 >= 10 }
    pub fn has_new_pop(self) -> bool { self.0 >= 10 }
    pub fn has_new_set_state(self) -> bool { self.0 >= 10 }
    pub fn has_import_alias(self) -> bool { self.0 >= 10 }
    pub fn uses_new_split_stack(self) -> bool { self.0 >= 11 }
    pub fn has_leave_support(self) -> bool { self.0 >= 11 }
    pub fn has_new_array_const(self) -> bool { self.0 >= 11 }
    pub fn has_map_support(self) -> bool { self.0 >= 11 }
    pub fn has_assign_pop(self) -> bool { self.0 >= 11 }
    pub fn has_new_list_assign(self) -> bool { self.0 >= 11 }
    pub fn has_new_logical(self) -> bool { self.0 >= 11 }
    pub fn supports_rest_element(self) -> bool { self.0 >= 12 }
    pub fn has_element_ops(self) -> bool { self.0 >= 12 }
    pub fn has_extended_numerics(self) -> bool { self.0 >= 12 }
    pub fn has_delegates(self) -> bool { self.0 >= 12 }
    pub fn has_optionals(self) -> bool { self.0 >= 12 }
    pub fn has_foreach(self) -> bool { self.0 >= 12 }
    pub fn uses_internal_operator_names(self) -> bool { self.0 >= 12 }
    pub fn has_small_integer_consts(self) -> bool { self.0 >= 13 }
    pub fn has_inline_symbol_table(self) -> bool { self.0 >= 13 }
    pub fn has_digests(self) -> bool { self.0 >= 13 }
    pub fn is_encrypted(self) -> bool { self.0 >= 15 }
    pub fn has_single_attribute_push(self) -> bool { self.0 <= 5 }
    pub fn has_frame_version_byte(self) -> bool { self.0 >= 8 }
    pub fn has_parameters(self) -> bool { self.0 > 3 }
    pub fn has_capture_support(self) -> bool { self.0 >= 8 }
    pub fn has_static_storage_size(self) -> bool { self.0 > 10 }
}
impl fmt::Display for AdhocVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl TryFrom<u32> for AdhocVersion {
    type Error = SerializationError;
    fn try_from(version: u32) -> Result<Self, Self::Error> {
        Self::new(version)
    }
}

#[test]
fn test_version_bounds() {
    assert!(AdhocVersion::new(0).is_err());
    assert!(AdhocVersion::new(16).is_err());
    for v in 1..=15 {
        assert_eq!(AdhocVersion::new(v).unwrap().get() as u32, v);
    }

    let v12 = AdhocVersion::new(12).unwrap();
    assert!(v12.has_symbol_table() && v12.supports_rest_element() && !v12.has_digests());
    let v5 = AdhocVersion::new(5).unwrap();
    assert!(v5.has_single_attribute_push() && !v5.uses_new_split_stack());
    assert!(AdhocVersion::new(15).unwrap().is_encrypted());
}
