mod catalogue;
mod failures;
mod isolation;
mod performance;
mod properties;
