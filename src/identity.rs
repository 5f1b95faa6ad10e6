use libc::{getpwuid, uid_t};
use std::ffi::CStr;

/// Login name of the operator, used as the default enrollment label.
/// Prefers the invoking user under `sudo`.
pub fn operator_name() -> Option<String> {
    if let Some(name) = std::env::var("SUDO_USER").ok().filter(|n| !n.is_empty()) {
        return Some(name);
    }
    // SAFETY: getpwuid returns a pointer into static storage or null; the
    // name is copied out before any other passwd call.
    unsafe {
        let pwd = getpwuid(libc::geteuid() as uid_t);
        if pwd.is_null() || (*pwd).pw_name.is_null() {
            return None;
        }
        let name = CStr::from_ptr((*pwd).pw_name).to_string_lossy().into_owned();
        (!name.is_empty()).then_some(name)
    }
}
