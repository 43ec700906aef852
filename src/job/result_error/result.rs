use crate::job::result_error::error::Error;
use crate::job::result_error::WithMsg;

pub type Result<T> = std::result::Result<T, Error>;

impl<T, S: Into<String>> WithMsg<S> for Result<T> {
    fn with_msg(self, msg: S) -> Self {
        self.map_err(|e| e.with_msg(msg))
    }
}
