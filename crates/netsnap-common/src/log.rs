// log.rs — engine-wide print/error functions.
// Converted from: myq2-original/qcommon/common.c Com_Printf/Com_DPrintf/Com_Error,
// kept as free functions with the same redirect-buffer and severity-code shape;
// the console redirect plumbing Com_Printf also drove (RD_BUFFER) is dropped
// since this engine has no console to redirect output to.

use std::sync::Mutex;

static DEVELOPER: Mutex<bool> = Mutex::new(false);

/// Enable or disable developer-only logging (`com_dprintf`). Mirrors the
/// "developer" cvar gate in the original engine, without needing a full
/// cvar system wired up just to flip one bool.
pub fn set_developer(enabled: bool) {
    *DEVELOPER.lock().unwrap() = enabled;
}

/// General-purpose print function.
pub fn com_printf(msg: &str) {
    print!("{}", msg);
}

/// Developer-only print, gated by [`set_developer`].
pub fn com_dprintf(msg: &str) {
    if *DEVELOPER.lock().unwrap() {
        com_printf(msg);
    }
}

/// Severity for [`com_error`]. `Fatal` is unrecoverable: a malformed or
/// adversarial package must not be allowed to corrupt client state, so
/// decode failures that violate a protocol invariant panic here rather
/// than silently producing a best-effort snapshot. `Drop` is recoverable:
/// it logs and lets the caller continue (e.g. an unexpected but
/// non-corrupting field-mask combination).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrCode {
    Fatal,
    Drop,
}

/// Engine error handler. `Fatal` prints to stderr and panics; `Drop` logs
/// and returns control to the caller.
pub fn com_error(code: ErrCode, msg: &str) {
    match code {
        ErrCode::Fatal => {
            eprintln!("Error: {}", msg);
            panic!("Fatal error: {}", msg);
        }
        ErrCode::Drop => {
            eprintln!("********************\nERROR: {}\n********************", msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "Fatal error: boom")]
    fn fatal_error_panics() {
        com_error(ErrCode::Fatal, "boom");
    }

    #[test]
    fn drop_error_does_not_panic() {
        com_error(ErrCode::Drop, "recoverable");
    }
}
