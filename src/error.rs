#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tick duration must be at least one millisecond. got: {0:?}")]
    InvalidTick(std::time::Duration),
    #[error("slot count must be greater than zero")]
    InvalidSlotCount,
}
