mod helpers;
mod meals;
mod week;

pub(crate) use meals::{cmd_add_meal, cmd_meals, cmd_sync};
pub(crate) use week::{cmd_clear, cmd_select, cmd_week};
