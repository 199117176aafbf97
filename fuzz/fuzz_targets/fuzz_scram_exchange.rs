#![no_main]

use libfuzzer_sys::arbitrary::{Result, Unstructured};
use libfuzzer_sys::fuzz_target;
use pg_secrets_connector::auth::{ChannelBinding, ScramClient};

/// Mechanism lists are mostly real names with the odd arbitrary string
fn mechanisms(u: &mut Unstructured<'_>) -> Result<Vec<String>> {
    const KNOWN: [&str; 3] = ["SCRAM-SHA-256", "SCRAM-SHA-256-PLUS", "SCRAM-SHA-1"];
    let mut out = Vec::new();
    for _ in 0..u.int_in_range(0..=4)? {
        if u.ratio(3, 4)? {
            out.push(u.choose(&KNOWN)?.to_string());
        } else {
            out.push(u.arbitrary()?);
        }
    }
    Ok(out)
}

fn exchange(u: &mut Unstructured<'_>) -> Result<()> {
    let offered = mechanisms(u)?;
    let binding_data: Option<Vec<u8>> = u.arbitrary()?;
    let had_binding = binding_data.is_some();

    let binding = ChannelBinding::negotiate(&offered, binding_data);
    let offers_plus = offered.iter().any(|m| m == "SCRAM-SHA-256-PLUS");
    match &binding {
        ChannelBinding::TlsServerEndPoint(_) => assert!(had_binding && offers_plus),
        ChannelBinding::ClientSupported => assert!(had_binding && !offers_plus),
        ChannelBinding::None => assert!(!had_binding),
    }

    let username: String = u.arbitrary()?;
    let password: String = u.arbitrary()?;
    let mut client = ScramClient::with_channel_binding(username, password, binding.clone());

    let first = client.client_first();
    let plus = matches!(binding, ChannelBinding::TlsServerEndPoint(_));
    assert_eq!(client.mechanism().ends_with("-PLUS"), plus);
    assert_eq!(first.starts_with("p=tls-server-end-point,,"), plus);

    let server_first: String = u.arbitrary()?;
    if let Ok((client_final, state)) = client.client_final(&server_first) {
        assert!(client_final.starts_with("c="));
        let server_final: String = u.arbitrary()?;
        let _ = client.verify_server_final(&server_final, &state);
    }
    Ok(())
}

fuzz_target!(|data: &[u8]| {
    let _ = exchange(&mut Unstructured::new(data));
});
