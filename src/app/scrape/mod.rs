pub mod engine;
pub mod output;
pub mod stability;
pub mod tracker;

#[cfg(test)]
mod tests;
