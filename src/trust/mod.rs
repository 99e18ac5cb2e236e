pub mod defects;
pub mod master_list;

#[cfg(test)]
pub(crate) mod test_support;

pub use defects::{DefectList, DefectType};
pub use master_list::{
    ChipSecurityChecker, MasterListChecker, TrustError, VerifiedChipSecurity,
};
