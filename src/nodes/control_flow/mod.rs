mod answer;
mod end;
mod if_else;
mod start;

pub use answer::AnswerNodeExecutor;
pub use end::EndNodeExecutor;
pub use if_else::IfElseNodeExecutor;
pub use start::StartNodeExecutor;
