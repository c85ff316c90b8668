pub mod protected;

pub use protected::protected_handler;
