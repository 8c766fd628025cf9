pub mod count_down_latch;
pub mod semaphore;
