#![no_main]

use libfuzzer_sys::fuzz_target;
use mongo_user_admin::client::{strip_ssl_suffix, ConnectionInfo};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(info) = ConnectionInfo::parse(s) {
        assert!(!info.hosts.is_empty());
        assert!(info.hosts.iter().all(|h| h.port != 0));

        // Debug output never carries the password
        if let Some(password) = info.password.as_deref().filter(|p| p.len() > 3) {
            let debug = format!("{:?}", info);
            assert!(!debug.contains(&format!("password: Some({:?})", password)));
        }
    }

    let stripped = strip_ssl_suffix(s);
    assert!(s.starts_with(stripped));
});
