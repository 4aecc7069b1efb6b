use std::fmt::Display;

/// Extension methods for [`Result`] used where an error is worth
/// reporting but not worth failing over.
pub trait ResultExt<T, E: Display> {
    /// Return the Ok value unchanged.  In the err case, log it, and
    /// return the default value.
    fn log_err_default(self) -> T
    where
        T: Default;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log_err_default(self) -> T
    where
        T: Default,
    {
        match self {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("{e:#}");
                Default::default()
            }
        }
    }
}
