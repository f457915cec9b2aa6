use thiserror::Error;

/// Store failures callers need to tell apart from plain I/O errors.
///
/// These travel inside `anyhow::Error`; recover them with `downcast_ref`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Meal {0} does not exist")]
    UnknownMeal(i64),
    #[error("Meal '{0}' is no longer on the menu")]
    MealRetired(String),
}
