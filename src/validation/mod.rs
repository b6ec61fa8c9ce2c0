//! Input validation for resource documents.
//!
//! Guards live in [`input_guards`]; [`Violations`] collects every failure of
//! a document so the client gets them all in one error response.

pub mod input_guards;

pub use input_guards::{
    ValidationError, ValidationResult, validate_date_order, validate_email, validate_length,
    validate_object_key, validate_range, validate_required, validate_url,
};

/// Accumulates validation failures across a whole document
#[derive(Debug, Default)]
pub struct Violations {
    errors: Vec<ValidationError>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the error of a guard, keeping its value on success
    pub fn check<T>(&mut self, result: ValidationResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.errors.push(err);
                None
            }
        }
    }

    pub fn push(&mut self, err: ValidationError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn into_inner(self) -> Vec<ValidationError> {
        self.errors
    }

    /// `Ok(())` when nothing was recorded
    pub fn finish(self) -> Result<(), Violations> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_all_failures() {
        let mut v = Violations::new();
        assert_eq!(v.check(validate_required("firstName", Some("Ada"))), Some("Ada"));
        v.check(validate_required("lastName", None));
        v.check(validate_email("email", "nope"));
        assert_eq!(v.len(), 2);
        let errors = v.finish().expect_err("two failures").into_inner();
        assert_eq!(errors[0].pointer(), "/data/attributes/lastName");
    }

    #[test]
    fn empty_finishes_ok() {
        assert!(Violations::new().finish().is_ok());
    }
}
