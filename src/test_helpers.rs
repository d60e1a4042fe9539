use std::{cell::RefCell, rc::Rc};

use crate::core::Runtime;

pub type Log = Rc<RefCell<Vec<String>>>;

/// Collects the warnings reported while `rt` is alive.
pub fn collect_warnings(rt: &mut Runtime) -> Log {
    let log = Log::default();
    let sink = log.clone();
    rt.set_warn_handler(move |message| sink.borrow_mut().push(message.to_string()));
    log
}
