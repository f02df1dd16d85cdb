pub mod catalog;
pub mod discovery;
pub mod packaging;
pub mod price;
pub mod remote;
pub mod sink;
