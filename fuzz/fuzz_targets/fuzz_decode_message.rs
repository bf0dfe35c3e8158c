#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use mongo_user_admin::protocol::{decode_document, decode_message, encode_message};

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    // Several replies may arrive in one TCP segment
    loop {
        if buf.is_empty() {
            break;
        }
        match decode_message(&mut buf) {
            Ok((msg, consumed)) => {
                if consumed == 0 {
                    break;
                }
                let _ = buf.split_to(consumed);

                let _ = encode_message(&msg);
            }
            Err(_) => break,
        }
    }

    let _ = decode_document(data);
});
