pub mod capability;
pub mod result;
pub mod turn;
