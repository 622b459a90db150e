#![forbid(unsafe_code)]

pub mod repository;
pub mod rest;
pub mod sqlite;

pub use repository::{AuthIdentity, AuthProvider, CourseFilter, LocalAuth, Storage, StorageError};
