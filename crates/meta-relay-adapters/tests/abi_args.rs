use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{address, aliases::I96, Address, U256};
use meta_relay_adapters::{encode_call, parse_call_args};
use meta_relay_core::{CallEncoder, ErrorKind};

const GRANT_SIG: &str = "updateFlowOperatorPermissions(address,address,uint8,int96,bytes)";

fn args(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[test]
fn scalars_are_parsed_verbatim() {
    let values = parse_call_args(
        "f(address,uint256,bool,string,bytes32)",
        &args(&[
            "0x00000000000000000000000000000000000000a1",
            "115792089237316195423570985008687907853269984665640564039457584007913129639935",
            "true",
            "\"hello world\"",
            "0x0101010101010101010101010101010101010101010101010101010101010101",
        ]),
    )
    .expect("parse");

    assert_eq!(
        values[0],
        DynSolValue::Address(address!("00000000000000000000000000000000000000a1"))
    );
    assert_eq!(values[1], DynSolValue::Uint(U256::MAX, 256));
    assert_eq!(values[2], DynSolValue::Bool(true));
    assert_eq!(values[3], DynSolValue::String("hello world".to_owned()));
    assert!(matches!(values[4], DynSolValue::FixedBytes(_, 32)));
}

#[test]
fn arrays_and_tuples_are_read_as_json() {
    let values = parse_call_args(
        "f(uint256[],(address,bool))",
        &args(&["[1,2,3]", "[\"0x00000000000000000000000000000000000000b2\", false]"]),
    )
    .expect("parse");

    assert_eq!(
        values[0],
        DynSolValue::Array(vec![
            DynSolValue::Uint(U256::from(1), 256),
            DynSolValue::Uint(U256::from(2), 256),
            DynSolValue::Uint(U256::from(3), 256),
        ])
    );
    assert_eq!(
        values[1],
        DynSolValue::Tuple(vec![
            DynSolValue::Address(Address::with_last_byte(0xb2)),
            DynSolValue::Bool(false),
        ])
    );
}

#[test]
fn textual_grant_matches_typed_encoding() {
    let token = Address::with_last_byte(0xa1);
    let operator = Address::with_last_byte(0xb2);
    let textual = encode_call(
        GRANT_SIG,
        &args(&[
            &token.to_string(),
            &operator.to_string(),
            "4",
            "1000",
            "0x",
        ]),
    )
    .expect("textual grant");
    let typed = CallEncoder
        .encode_grant(token, operator, 4, "1000".parse::<I96>().expect("fits"), Default::default())
        .expect("typed grant");

    assert_eq!(textual, typed);
}

#[test]
fn argument_count_is_checked() {
    let err = parse_call_args(GRANT_SIG, &args(&["0x00", "0x00"])).expect_err("two of five");
    assert_eq!(err.kind(), ErrorKind::Encoding);
    assert!(err.to_string().contains("expected 5, got 2"));
}

#[test]
fn bad_values_name_the_argument() {
    let err = parse_call_args("f(uint8,uint256)", &args(&["1", "twelve"])).expect_err("bad uint");
    assert_eq!(err.kind(), ErrorKind::Encoding);
    let message = err.to_string();
    assert!(message.contains("argument 1"), "{message}");
    assert!(message.contains("invalid uint"), "{message}");

    let err = parse_call_args("f(bytes4)", &args(&["0x0102"])).expect_err("short fixed bytes");
    assert!(err.to_string().contains("expected 4 bytes, got 2"));

    let err = parse_call_args("f(address", &args(&[])).expect_err("broken signature");
    assert!(err.to_string().contains("invalid function signature"));
}
