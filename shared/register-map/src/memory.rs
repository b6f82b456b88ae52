use num_traits::PrimInt;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationSnafu, Result};

const ENTITY: &str = "memory";

/// Number of `divisor`-sized units needed to hold `value`.
pub(crate) fn div_ceil<T: PrimInt>(value: T, divisor: T) -> T {
    let quotient = value / divisor;
    if value % divisor == T::zero() {
        quotient
    } else {
        quotient + T::one()
    }
}

/// Rounds `value` up to the next multiple of `multiple`, or `None` on overflow.
pub(crate) fn round_up<T: PrimInt>(value: T, multiple: T) -> Option<T> {
    match value % multiple {
        remainder if remainder == T::zero() => Some(value),
        remainder => value.checked_add(&(multiple - remainder)),
    }
}

/// Properties of the target memory space shared by every element of a register map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfiguration {
    memory_unit_bits: u32,
    address_bits: u32,
    base_address: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_size: Option<u64>,
}

impl Default for MemoryConfiguration {
    fn default() -> Self {
        Self {
            memory_unit_bits: 8,
            address_bits: 32,
            base_address: 0,
            page_size: None,
        }
    }
}

impl MemoryConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bits in one addressable memory unit.
    pub fn memory_unit_bits(&self) -> u32 {
        self.memory_unit_bits
    }

    pub fn address_bits(&self) -> u32 {
        self.address_bits
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn page_size(&self) -> Option<u64> {
        self.page_size
    }

    /// The highest addressable memory unit.
    pub fn max_address(&self) -> u64 {
        max_address(self.address_bits)
    }

    /// Memory units occupied by the page register at the top of every page.
    pub fn page_register_units(&self) -> u64 {
        div_ceil(
            u64::from(self.address_bits),
            u64::from(self.memory_unit_bits),
        )
    }

    pub fn units_for_bits(&self, bits: u64) -> u64 {
        div_ceil(bits, u64::from(self.memory_unit_bits))
    }

    /// Moves an address that would land on the page register of its page to the first address of
    /// the next page. Any other address is returned unchanged.
    pub fn apply_page_register(&self, proposed: u64) -> u64 {
        let Some(page_size) = self.page_size else {
            return proposed;
        };
        let page_start = proposed - proposed % page_size;
        let page_register_start =
            page_start.saturating_add(page_size - self.page_register_units());
        if proposed >= page_register_start {
            page_start.saturating_add(page_size)
        } else {
            proposed
        }
    }

    pub fn set_memory_unit_bits(&mut self, bits: u32) -> Result<()> {
        if bits == 0 {
            return ConfigurationSnafu {
                entity: ENTITY,
                message: "memory unit bits must be a positive non-zero integer",
            }
            .fail();
        }
        self.check_page_size(self.page_size, self.address_bits, bits)?;
        self.memory_unit_bits = bits;
        Ok(())
    }

    pub fn set_address_bits(&mut self, bits: u32) -> Result<()> {
        if !(1..=64).contains(&bits) {
            return ConfigurationSnafu {
                entity: ENTITY,
                message: format!("memory address bits must be between 1 and 64, got {bits}"),
            }
            .fail();
        }
        if self.base_address > max_address(bits) {
            return ConfigurationSnafu {
                entity: ENTITY,
                message: format!(
                    "addressable memory with {bits} address bits must be greater than the base \
                     address {:#x}",
                    self.base_address
                ),
            }
            .fail();
        }
        self.check_page_size(self.page_size, bits, self.memory_unit_bits)?;
        self.address_bits = bits;
        Ok(())
    }

    pub fn set_base_address(&mut self, address: u64) -> Result<()> {
        if address > self.max_address() {
            return ConfigurationSnafu {
                entity: ENTITY,
                message: format!(
                    "base address {address:#x} must be less than maximum addressable memory {:#x}",
                    self.max_address()
                ),
            }
            .fail();
        }
        self.base_address = address;
        Ok(())
    }

    pub fn set_page_size(&mut self, page_size: Option<u64>) -> Result<()> {
        self.check_page_size(page_size, self.address_bits, self.memory_unit_bits)?;
        self.page_size = page_size;
        Ok(())
    }

    /// Checks a configuration that was not built through the setters, e.g. a deserialized one.
    pub fn validate(&self) -> Result<()> {
        let mut checked = Self::default();
        checked.set_memory_unit_bits(self.memory_unit_bits)?;
        checked.set_address_bits(self.address_bits)?;
        checked.set_base_address(self.base_address)?;
        checked.set_page_size(self.page_size)?;
        Ok(())
    }

    fn check_page_size(
        &self,
        page_size: Option<u64>,
        address_bits: u32,
        memory_unit_bits: u32,
    ) -> Result<()> {
        let Some(page_size) = page_size else {
            return Ok(());
        };
        let page_register_units =
            div_ceil(u64::from(address_bits), u64::from(memory_unit_bits));
        if page_size <= page_register_units {
            return ConfigurationSnafu {
                entity: ENTITY,
                message: format!(
                    "page size {page_size} must be larger than the {page_register_units} memory \
                     unit(s) of the page register"
                ),
            }
            .fail();
        }
        Ok(())
    }
}

fn max_address(address_bits: u32) -> u64 {
    if address_bits >= 64 {
        u64::MAX
    } else {
        (1 << address_bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    use super::*;

    #[test]
    fn defaults() {
        let memory = MemoryConfiguration::new();
        assert_eq!(memory.memory_unit_bits(), 8);
        assert_eq!(memory.address_bits(), 32);
        assert_eq!(memory.base_address(), 0);
        assert_eq!(memory.page_size(), None);
        assert_eq!(memory.max_address(), 0xffff_ffff);
        assert_eq!(memory.page_register_units(), 4);
    }

    #[test]
    fn rounding_helpers() {
        assert_eq!(div_ceil(11u64, 8), 2);
        assert_eq!(div_ceil(16u64, 8), 2);
        assert_eq!(div_ceil(0u64, 8), 0);
        assert_eq!(round_up(0x110u64, 4), Some(0x110));
        assert_eq!(round_up(0x111u64, 4), Some(0x114));
        assert_eq!(round_up(u64::MAX, 2), None);
    }

    #[test]
    fn base_address_must_be_addressable() {
        let mut memory = MemoryConfiguration::new();
        memory.set_address_bits(4).unwrap();
        let error = memory.set_base_address(20).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert_eq!(memory.base_address(), 0);
    }

    #[test]
    fn address_bits_cannot_drop_below_base_address() {
        let mut memory = MemoryConfiguration::new();
        memory.set_base_address(20).unwrap();
        let error = memory.set_address_bits(4).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert_eq!(memory.address_bits(), 32);
    }

    #[test]
    fn invalid_widths_are_rejected() {
        let mut memory = MemoryConfiguration::new();
        assert!(memory.set_memory_unit_bits(0).is_err());
        assert!(memory.set_address_bits(0).is_err());
        assert!(memory.set_address_bits(65).is_err());
        memory.set_address_bits(64).unwrap();
        assert_eq!(memory.max_address(), u64::MAX);
    }

    #[test]
    fn page_register_pushes_to_next_page() {
        let mut memory = MemoryConfiguration::new();
        memory.set_address_bits(16).unwrap();
        memory.set_page_size(Some(0x80)).unwrap();
        assert_eq!(memory.page_register_units(), 2);
        assert_eq!(memory.apply_page_register(0x7d), 0x7d);
        assert_eq!(memory.apply_page_register(0x7e), 0x80);
        assert_eq!(memory.apply_page_register(0x7f), 0x80);
        assert_eq!(memory.apply_page_register(0x80), 0x80);
        assert_eq!(memory.apply_page_register(0xfe), 0x100);
    }

    #[test]
    fn page_must_exceed_page_register() {
        let mut memory = MemoryConfiguration::new();
        assert!(memory.set_page_size(Some(4)).is_err());
        memory.set_page_size(Some(5)).unwrap();
        // Widening the address would make the page register fill the page.
        assert!(memory.set_address_bits(40).is_err());
    }

    #[test]
    fn deserialized_configuration_is_validated() {
        let memory: MemoryConfiguration =
            serde_json::from_str(r#"{"memoryUnitBits": 0}"#).unwrap();
        assert_eq!(memory.validate().unwrap_err().kind(), ErrorKind::Configuration);

        let memory: MemoryConfiguration =
            serde_json::from_str(r#"{"addressBits": 16, "pageSize": 256}"#).unwrap();
        memory.validate().unwrap();
        assert_eq!(memory.memory_unit_bits(), 8);
    }
}
