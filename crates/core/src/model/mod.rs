mod ids;
mod progress;

pub use ids::{LessonIndex, ParseIdError, UserId};
pub use progress::{
    ALLOWED_FIELDS, LAST_COMPLETED_LESSON, PROGRESS_PERCENT, PayloadError, ProgressPercent,
    ProgressRecord, ProgressUpdate, UPDATED_AT,
};
