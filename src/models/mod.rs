pub mod parcel;
pub mod rule;
pub mod user;
