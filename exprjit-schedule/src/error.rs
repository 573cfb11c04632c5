/// Errors raised while linearizing a graph into a schedule.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error("input list contains the same variable more than once")]
    DuplicateInput,
}
