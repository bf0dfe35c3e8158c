#![no_main]

use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use mongo_user_admin::auth::scram::MIN_ITERATIONS;
use mongo_user_admin::auth::{Mechanism, ScramClient, ScramError};

/// A SCRAM conversation where the server side is attacker-controlled but keeps
/// the client's nonce as its prefix, so parsing goes past the nonce check.
#[derive(Debug)]
struct Conversation {
    sha1: bool,
    username: String,
    password: String,
    nonce_suffix: String,
    salt: String,
    iterations: u32,
    mandatory_extension: bool,
    trailing: String,
    server_final: String,
}

impl<'a> Arbitrary<'a> for Conversation {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            sha1: u.arbitrary()?,
            username: u.arbitrary()?,
            password: u.arbitrary()?,
            nonce_suffix: u.arbitrary()?,
            salt: u.arbitrary()?,
            iterations: u.arbitrary()?,
            mandatory_extension: u.arbitrary()?,
            trailing: u.arbitrary()?,
            server_final: u.arbitrary()?,
        })
    }
}

fn unescape(saslname: &str) -> String {
    saslname.replace("=2C", ",").replace("=3D", "=")
}

fuzz_target!(|input: Conversation| {
    let mechanism = if input.sha1 {
        Mechanism::ScramSha1
    } else {
        Mechanism::ScramSha256
    };
    let mut client =
        ScramClient::with_mechanism(mechanism, input.username.clone(), input.password.clone());

    // n,,n=<saslname>,r=<nonce>: commas in the username must be escaped
    let first = client.client_first();
    let bare = first.strip_prefix("n,,n=").expect("GS2 header and username attribute");
    let (saslname, nonce) = bare.rsplit_once(",r=").expect("nonce attribute");
    assert!(!saslname.contains(','), "unescaped comma in {:?}", saslname);
    assert_eq!(unescape(saslname), input.username);

    let server_first = format!(
        "{}r={}{},s={},i={}{}",
        if input.mandatory_extension { "m=x," } else { "" },
        nonce,
        input.nonce_suffix,
        input.salt,
        input.iterations,
        input.trailing
    );

    let Ok((client_final, state)) = client.client_final(&server_first) else {
        return;
    };

    assert!(!input.mandatory_extension, "mandatory extension accepted");
    assert!(
        input.iterations >= MIN_ITERATIONS || input.trailing.contains("i="),
        "{} iterations accepted",
        input.iterations
    );
    assert!(client_final.starts_with("c=biws,r="));
    assert!(client_final.contains(",p="));

    match client.verify_server_final(&input.server_final, &state) {
        Ok(()) => assert!(input.server_final.starts_with("v=")),
        Err(ScramError::ServerError(_)) => assert!(input.server_final.starts_with("e=")),
        Err(_) => assert!(!input.server_final.starts_with("e=")),
    }
});
