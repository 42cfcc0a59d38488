use serde::Serialize;
use std::fmt;

/// USB vendor id assigned to Ricoh
pub const RICOH_VENDOR_ID: u16 = 0x05ca;

/// THETA bodies that expose a UVC live streaming interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThetaModel {
    #[serde(rename = "THETA V")]
    V,
    #[serde(rename = "THETA Z1")]
    Z1,
}

impl ThetaModel {
    pub const ALL: [ThetaModel; 2] = [ThetaModel::V, ThetaModel::Z1];

    /// Product id of the body while in live streaming (UVC) mode
    pub fn product_id(self) -> u16 {
        match self {
            ThetaModel::V => 0x2712,
            ThetaModel::Z1 => 0x2715,
        }
    }

    pub fn from_ids(vendor_id: u16, product_id: u16) -> Option<Self> {
        if vendor_id != RICOH_VENDOR_ID {
            return None;
        }

        Self::ALL
            .into_iter()
            .find(|model| model.product_id() == product_id)
    }

    pub fn name(self) -> &'static str {
        match self {
            ThetaModel::V => "THETA V",
            ThetaModel::Z1 => "THETA Z1",
        }
    }
}

/// Identity strings read from a USB device descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl DeviceDescriptor {
    pub fn model(&self) -> Option<ThetaModel> {
        ThetaModel::from_ids(self.vendor_id, self.product_id)
    }

    pub fn is_theta(&self) -> bool {
        self.model().is_some()
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {} (serial {})",
            self.vendor_id,
            self.product_id,
            self.product.as_deref().unwrap_or("Unknown"),
            self.serial_number.as_deref().unwrap_or("Unknown"),
        )
    }
}

/// Serializable view of a matched device, used by `list --json`
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub model: Option<ThetaModel>,
    #[serde(flatten)]
    pub descriptor: DeviceDescriptor,
}
