//! Output capture for script execution
//!
//! A thread-local buffer that collects the lines written by the `print`
//! built-in while a capture is active, instead of writing them to stdout.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::Mutex;

thread_local! {
    static OUTPUT_BUFFER: RefCell<Option<Arc<Mutex<Vec<String>>>>> = const { RefCell::new(None) };
}

/// Captured output from script execution
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    /// Lines written by `print`
    pub stdout: Vec<String>,
}

impl OutputCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Execute a function with output capture enabled
///
/// Lines printed by scripts on this thread while `f` runs are returned in
/// the [`OutputCapture`] instead of reaching stdout. Captures nest: the
/// previous buffer is restored afterwards.
///
/// # Example
/// ```ignore
/// let (result, output) = with_output_capture(|| script.do_string("print('hi')"));
/// assert_eq!(output.stdout, vec!["hi"]);
/// ```
pub fn with_output_capture<F, R>(f: F) -> (R, OutputCapture)
where
    F: FnOnce() -> R,
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let previous = OUTPUT_BUFFER.with(|cell| cell.borrow_mut().replace(Arc::clone(&buffer)));

    let result = f();

    OUTPUT_BUFFER.with(|cell| {
        *cell.borrow_mut() = previous;
    });

    let stdout = std::mem::take(&mut *buffer.lock());
    (result, OutputCapture { stdout })
}

/// Append a line to the active capture buffer
///
/// Returns true if the line was captured, false if it should go to stdout.
pub(crate) fn capture_output(text: &str) -> bool {
    OUTPUT_BUFFER.with(|cell| match cell.borrow().as_ref() {
        Some(buffer) => {
            buffer.lock().push(text.to_string());
            true
        }
        None => false,
    })
}
