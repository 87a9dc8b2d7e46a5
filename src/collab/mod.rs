pub mod presence;
pub mod reconciler;

pub use reconciler::{ProjectRefresher, Reconciler, SettingsDraft};
