//! Novasphere CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Wukong virtual machine
//! controller, plus the quantity parsing and validation rules shared by
//! the controller and by `crdgen`.

pub mod quantity;
pub mod validation;
pub mod wukong;
pub mod wukong_snapshot;

pub use quantity::{Quantity, QuantityError};
pub use validation::{ValidationError, validate_spec, validate_update};
pub use wukong::*;
pub use wukong_snapshot::*;
