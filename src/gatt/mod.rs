pub mod catalog;
pub mod characteristic;
pub mod descriptor;
pub mod ids;
pub mod properties;
pub mod service;
