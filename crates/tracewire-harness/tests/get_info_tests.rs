//! GetInfo scenarios
//!
//! Version, software id, feature advertisement, and the protected-region
//! queries, all through the in-memory link.

use tracewire_core::protocol::codec::{decode_address, WIRE_ADDRESS_SIZE};
use tracewire_core::{DeviceConfig, FeatureFlags, ResponseCode, PROTOCOL_VERSION};
use tracewire_harness::DeviceLink;

fn connected_link(config: &DeviceConfig) -> DeviceLink {
    let mut link = DeviceLink::new(config);
    link.connect();
    link
}

#[test]
fn protocol_version_is_advertised() {
    let mut link = connected_link(&DeviceConfig::new());
    let response = link.request(1, 1, &[]).unwrap();
    assert_eq!(response.response_code, ResponseCode::Ok);
    assert_eq!(response.data, vec![PROTOCOL_VERSION.major, PROTOCOL_VERSION.minor]);
}

#[test]
fn software_id_round_trips_from_config() {
    let id: [u8; 16] = *b"fw-2024.06-rel-7";
    let mut config = DeviceConfig::new();
    config.set_software_id(id);

    let mut link = connected_link(&config);
    let response = link.request(1, 2, &[]).unwrap();
    assert_eq!(response.response_code, ResponseCode::Ok);
    assert_eq!(response.data, id.to_vec());
}

#[test]
fn supported_features_match_the_build() {
    let mut link = connected_link(&DeviceConfig::new());
    let response = link.request(1, 3, &[]).unwrap();
    assert_eq!(response.response_code, ResponseCode::Ok);
    assert_eq!(response.data.len(), 1);

    let flags = FeatureFlags::new(response.data[0]);
    assert!(flags.has(FeatureFlags::MEMORY_READ));
    assert!(flags.has(FeatureFlags::MEMORY_WRITE));
    assert_eq!(response.data[0], FeatureFlags::advertised().as_u8());
}

#[test]
fn special_region_count_reflects_configuration() {
    let mut config = DeviceConfig::new();
    config.add_forbidden_range(0x1000, 0x1FFF).unwrap();
    config.add_forbidden_range(0x3000, 0x3FFF).unwrap();
    config.add_readonly_range(0x8000, 0x80FF).unwrap();

    let mut link = connected_link(&config);
    let response = link.request(1, 4, &[]).unwrap();
    assert_eq!(response.response_code, ResponseCode::Ok);
    // Readonly count first, forbidden count second.
    assert_eq!(response.data, vec![1, 2]);
}

#[test]
fn special_region_location_names_the_range() {
    let mut config = DeviceConfig::new();
    config.add_forbidden_range(0x1000, 0x1FFF).unwrap();
    config.add_forbidden_range(0x3000, 0x3FFF).unwrap();

    let mut link = connected_link(&config);
    // Region type 1 (forbidden), index 1.
    let response = link.request(1, 5, &[0x01, 0x01]).unwrap();
    assert_eq!(response.response_code, ResponseCode::Ok);
    assert_eq!(response.data.len(), 2 + 2 * WIRE_ADDRESS_SIZE);
    assert_eq!(&response.data[..2], &[0x01, 0x01]);

    let start = decode_address(&response.data[2..2 + WIRE_ADDRESS_SIZE]);
    let end = decode_address(&response.data[2 + WIRE_ADDRESS_SIZE..]);
    assert_eq!((start, end), (0x3000, 0x3FFF));
}

#[test]
fn special_region_location_rejects_bad_queries() {
    let mut config = DeviceConfig::new();
    config.add_readonly_range(0x8000, 0x80FF).unwrap();
    let mut link = connected_link(&config);

    // Index past the table.
    let response = link.request(1, 5, &[0x00, 0x01]).unwrap();
    assert_eq!(response.response_code, ResponseCode::FailureToProceed);
    assert!(response.data.is_empty());

    // Unknown region type byte.
    let response = link.request(1, 5, &[0x02, 0x00]).unwrap();
    assert_eq!(response.response_code, ResponseCode::InvalidRequest);

    // Wrong body length.
    let response = link.request(1, 5, &[0x00]).unwrap();
    assert_eq!(response.response_code, ResponseCode::InvalidRequest);
}

#[test]
fn unknown_get_info_subfunction_is_unsupported() {
    let mut link = connected_link(&DeviceConfig::new());
    let response = link.request(1, 9, &[]).unwrap();
    assert_eq!(response.response_code, ResponseCode::UnsupportedFeature);
    assert!(response.data.is_empty());
}
