use bitcoin::Script;
use opnet_primitives::ScriptKind;

/// Classifies an output script into the standard classes the indexer
/// tracks.
pub fn classify_script(script: &Script) -> ScriptKind {
    if script.is_p2pk() {
        ScriptKind::P2pk
    } else if script.is_p2pkh() {
        ScriptKind::P2pkh
    } else if script.is_p2sh() {
        ScriptKind::P2sh
    } else if script.is_p2wpkh() {
        ScriptKind::P2wpkh
    } else if script.is_p2wsh() {
        ScriptKind::P2wsh
    } else if script.is_p2tr() {
        ScriptKind::P2tr
    } else {
        ScriptKind::Nonstandard
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::ScriptBuf;

    use super::*;

    #[test]
    fn test_classify_standard_scripts() {
        // p2wpkh: OP_0 <20 bytes>
        let p2wpkh = ScriptBuf::from_hex("001478a93a5b649de9deabd9494ae9bc41f3c9c13837").unwrap();
        assert_eq!(classify_script(&p2wpkh), ScriptKind::P2wpkh);

        // p2tr: OP_1 <32 bytes>
        let p2tr = ScriptBuf::from_hex(
            "5120000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
        )
        .unwrap();
        assert_eq!(classify_script(&p2tr), ScriptKind::P2tr);

        // p2pkh: OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
        let p2pkh =
            ScriptBuf::from_hex("76a9140389035a9225b3839e2bbf32d826a1e222031fd888ac").unwrap();
        assert_eq!(classify_script(&p2pkh), ScriptKind::P2pkh);

        let junk = ScriptBuf::from_bytes(vec![0x6a, 0x01, 0xff]);
        assert_eq!(classify_script(&junk), ScriptKind::Nonstandard);
    }
}
