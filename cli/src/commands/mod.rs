mod day;
mod helpers;
mod product;
mod recover;
mod tombstones;

pub(crate) use day::{cmd_day, cmd_hours, cmd_item_add, cmd_meal_add, cmd_meal_clear, cmd_meal_remove};
pub(crate) use product::{
    ProductArgs, cmd_favorite, cmd_popular, cmd_product_add, cmd_product_delete, cmd_product_list,
    cmd_product_restore,
};
pub(crate) use recover::{cmd_orphans, cmd_recover};
pub(crate) use tombstones::{
    cmd_tombstones_clear, cmd_tombstones_export, cmd_tombstones_import, cmd_tombstones_list,
    cmd_tombstones_sweep,
};
