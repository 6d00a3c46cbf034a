// Basically does same as anyhow::ensure
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}

pub(crate) use ensure;

/// Formats a frame as space separated hex bytes for logging
pub(crate) fn hex(frame: &[u8]) -> String {
    frame
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
