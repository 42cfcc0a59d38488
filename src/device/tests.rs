use super::*;
use crate::backend::{MockBackend, MockDevice, UvcDevice};
use crate::error::{ThetaError, UvcError};

fn webcam() -> MockDevice {
    MockDevice::new(DeviceDescriptor {
        vendor_id: 0x046d,
        product_id: 0x0825,
        serial_number: Some("C270".to_string()),
        manufacturer: Some("Logitech".to_string()),
        product: Some("Webcam C270".to_string()),
    })
}

fn create_test_bus() -> MockBackend {
    MockBackend::new()
        .with_device(webcam())
        .with_device(MockDevice::theta(ThetaModel::V, "00105377"))
        .with_device(MockDevice::theta(ThetaModel::Z1, "10010104"))
}

fn serial<D: UvcDevice>(device: &D) -> String {
    device
        .descriptor()
        .unwrap()
        .serial_number
        .unwrap_or_default()
}

#[test]
fn test_model_ids() {
    assert_eq!(ThetaModel::from_ids(0x05ca, 0x2712), Some(ThetaModel::V));
    assert_eq!(ThetaModel::from_ids(0x05ca, 0x2715), Some(ThetaModel::Z1));
    assert_eq!(ThetaModel::from_ids(0x05ca, 0x0366), None);
    assert_eq!(ThetaModel::from_ids(0x046d, 0x2712), None);
}

#[test]
fn test_find_devices_filters_and_keeps_order() {
    let bus = create_test_bus();
    let devices = find_devices(&bus).unwrap();

    let serials: Vec<String> = devices.iter().map(serial).collect();
    assert_eq!(serials, vec!["00105377", "10010104"]);
}

#[test]
fn test_find_devices_without_theta() {
    let bus = MockBackend::new().with_device(webcam());

    let result = find_devices(&bus);
    assert!(matches!(result, Err(ThetaError::Uvc(UvcError::NoDevice))));
}

#[test]
fn test_find_device_by_index() {
    let bus = create_test_bus();

    assert_eq!(serial(&find_device(&bus, 0).unwrap()), "00105377");
    assert_eq!(serial(&find_device(&bus, 1).unwrap()), "10010104");

    let missing = find_device(&bus, 2);
    assert!(matches!(missing, Err(ThetaError::Uvc(UvcError::NoDevice))));
}

#[test]
fn test_unreadable_descriptor_is_skipped() {
    let bus = MockBackend::new()
        .with_device(MockDevice::theta(ThetaModel::V, "broken").failing_descriptor(UvcError::Io))
        .with_device(MockDevice::theta(ThetaModel::Z1, "10010104"));

    let devices = find_devices(&bus).unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(serial(&devices[0]), "10010104");
}

#[test]
fn test_list_devices() {
    let bus = create_test_bus();
    let infos = list_devices(&bus).unwrap();

    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].index, 0);
    assert_eq!(infos[0].model, Some(ThetaModel::V));
    assert_eq!(infos[1].index, 1);
    assert_eq!(infos[1].model, Some(ThetaModel::Z1));

    let json = serde_json::to_value(&infos[1]).unwrap();
    assert_eq!(json["model"], "THETA Z1");
    assert_eq!(json["serial_number"], "10010104");
    assert_eq!(json["vendor_id"], 0x05ca);

    assert!(list_devices(&MockBackend::new()).unwrap().is_empty());
}

#[test]
fn test_print_devices_table() {
    let bus = create_test_bus();
    let mut out = Vec::new();
    print_devices(&bus, &mut out).unwrap();

    let expected = concat!(
        "No : Product            : Serial    \n",
        " 0 : THETA V            : 00105377  \n",
        " 1 : THETA Z1           : 10010104  \n",
    );
    assert_eq!(String::from_utf8(out).unwrap(), expected);
}

#[test]
fn test_print_devices_empty_bus() {
    let mut out = Vec::new();
    print_devices(&MockBackend::new(), &mut out).unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "No : Product            : Serial    \n"
    );
}

struct BrokenPipe;

impl std::io::Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "reader went away",
        ))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_print_devices_output_error() {
    let result = print_devices(&create_test_bus(), &mut BrokenPipe);

    match result {
        Err(ThetaError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
        other => panic!("Expected an I/O error, got {:?}", other),
    }
}

#[test]
fn test_descriptor_display() {
    let descriptor = MockDevice::theta(ThetaModel::V, "00105377")
        .descriptor()
        .unwrap();
    assert_eq!(
        descriptor.to_string(),
        "05ca:2712 THETA V (serial 00105377)"
    );
    assert!(descriptor.is_theta());
}
