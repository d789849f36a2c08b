//! Cross-crate error conversions for hotswap-plugins
//!
//! Implements `From<DomainError> for KernelError` so that errors from this
//! crate can be converted to the unified `KernelError` type defined in
//! `hotswap-kernel` using the `?` operator.

use hotswap_kernel::error::KernelError;

// ============================================================================
// ReloadError → KernelError
// ============================================================================

impl From<crate::hot_reload::ReloadError> for KernelError {
    fn from(err: crate::hot_reload::ReloadError) -> Self {
        KernelError::Runtime(err.to_string())
    }
}

// ============================================================================
// ConstraintParseError → KernelError
// ============================================================================

impl From<crate::hot_reload::ConstraintParseError> for KernelError {
    fn from(err: crate::hot_reload::ConstraintParseError) -> Self {
        KernelError::Runtime(err.to_string())
    }
}

// ============================================================================
// CycleError → KernelError
// ============================================================================

impl From<crate::hot_reload::CycleError> for KernelError {
    fn from(err: crate::hot_reload::CycleError) -> Self {
        KernelError::Runtime(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
