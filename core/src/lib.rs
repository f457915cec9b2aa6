//! Core of the mealbot weekly meal planner.
//!
//! The [`cache::MealCache`] mirrors a menu from a [`source::MealSource`] into
//! SQLite once per day; the [`selection::SelectionStore`] records which meal
//! each user picked for each day of the week.

pub mod cache;
pub mod db;
pub mod error;
pub mod models;
pub mod schedule;
pub mod selection;
pub mod source;
pub mod week;
