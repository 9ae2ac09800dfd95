pub mod checkout;
pub mod classes;
pub mod core;
pub mod sessions;
pub mod students;
pub mod subscription;
