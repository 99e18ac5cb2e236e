pub mod aux_data;
pub mod tlv;

pub use aux_data::AuxiliaryData;
pub use tlv::Tlv;
