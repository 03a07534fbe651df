//! Centralized error handling for the stream aggregation pipeline
//!
//! This module provides a hierarchical error system that unifies error types
//! across all application layers and keeps wire-facing error codes stable.
//!
//! # Error Categories
//!
//! - **Expression Errors**: parse/evaluation failures of the stream DSL
//! - **Fetch Errors**: outbound HTTP, timeouts, recursion guard
//! - **Lock Errors**: distributed single-flight coordination
//! - **Debrid Errors**: playback resolution with stable short codes
//! - **Config/Database/Web Errors**: supporting layers
//!
//! # Usage
//!
//! ```rust
//! use stream_fusion::errors::{AppError, AppResult};
//!
//! async fn example_function() -> AppResult<String> {
//!     // Function can return any error type that converts to AppError
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for expression Results
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Convenience type alias for outbound fetch Results
pub type FetchResult<T> = Result<T, FetchError>;

/// Convenience type alias for lock/memoizer Results
pub type LockResult<T> = Result<T, LockError>;

/// Convenience type alias for debrid Results
pub type DebridResult<T> = Result<T, DebridError>;
