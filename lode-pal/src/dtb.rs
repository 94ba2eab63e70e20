//! Device tree queries for bring-up
//!
//! The loader only needs three things from the device tree: its size (to
//! forward it to the kernel), the hardware ids of the cores, and the nodes
//! that can select a bring-up driver. The blob itself is passed on
//! untouched.

use fdt::Fdt;

use lode_common::PhysAddr;

use crate::smp::{CpuRelease, DriverNode};

/// Parse result errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtbError {
    /// No DTB address provided
    NoDtbAddress,
    /// DTB parsing failed (invalid magic, truncated, etc.)
    InvalidDtb,
    /// Required node not found in device tree
    MissingNode(&'static str),
    /// Property data is invalid or malformed
    InvalidData,
    /// More cores than the caller has room for
    TooManyCores(usize),
}

impl core::fmt::Display for DtbError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoDtbAddress => write!(f, "no device tree address"),
            Self::InvalidDtb => write!(f, "invalid device tree blob"),
            Self::MissingNode(name) => write!(f, "missing node {name}"),
            Self::InvalidData => write!(f, "malformed property"),
            Self::TooManyCores(n) => write!(f, "{n} cores listed"),
        }
    }
}

/// Parse the device tree blob at `dtb`.
///
/// # Safety
///
/// `dtb` must point to readable memory holding a device tree blob for the
/// rest of the boot.
pub unsafe fn from_phys(dtb: PhysAddr) -> Result<Fdt<'static>, DtbError> {
    if dtb.is_null() {
        return Err(DtbError::NoDtbAddress);
    }
    // SAFETY: Caller guarantees the blob is mapped and stays valid
    unsafe { Fdt::from_ptr(dtb.as_u64() as usize as *const u8) }.map_err(|_| DtbError::InvalidDtb)
}

/// Parse a device tree from a byte slice.
pub fn from_slice(blob: &[u8]) -> Result<Fdt<'_>, DtbError> {
    Fdt::new(blob).map_err(|_| DtbError::InvalidDtb)
}

/// Size of the blob in bytes, as recorded in its header.
#[must_use]
pub fn total_size(fdt: &Fdt<'_>) -> usize {
    fdt.total_size()
}

/// Read a big-endian cell group from a property value.
fn read_cells(value: &[u8], cells: usize) -> Option<u64> {
    if cells == 0 || cells > 2 || value.len() < cells * 4 {
        return None;
    }
    let mut out = 0u64;
    for chunk in value[..cells * 4].chunks_exact(4) {
        let word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        out = (out << 32) | u64::from(word);
    }
    Some(out)
}

/// Collect the hardware ids of the enabled cores under `/cpus` into `out`.
///
/// The id is the first address of each `cpu@N` node's `reg` property, read
/// with the `#address-cells` of `/cpus`. Cores whose `status` is anything
/// other than `"okay"` are skipped. Returns the number of ids written, or
/// the number of enabled cores if they do not all fit.
pub fn cpu_hw_ids(fdt: &Fdt<'_>, out: &mut [u64]) -> Result<usize, DtbError> {
    let cpus = fdt.find_node("/cpus").ok_or(DtbError::MissingNode("/cpus"))?;
    let address_cells = cpus.cell_sizes().address_cells;

    let mut count = 0;
    for node in cpus.children() {
        if node.name.split('@').next() != Some("cpu") {
            continue;
        }
        let enabled = node
            .property("status")
            .and_then(|p| p.as_str())
            .is_none_or(|status| status == "okay" || status == "ok");
        if !enabled {
            continue;
        }
        let reg = node.property("reg").ok_or(DtbError::InvalidData)?;
        let id = read_cells(reg.value, address_cells).ok_or(DtbError::InvalidData)?;

        if let Some(slot) = out.get_mut(count) {
            *slot = id;
        }
        count += 1;
    }
    if count > out.len() {
        return Err(DtbError::TooManyCores(count));
    }
    Ok(count)
}

/// Every (compatible string, method) pair in the tree, in document order,
/// followed by the cpu nodes that carry a `cpu-release-addr`.
///
/// A cpu node appears with its `enable-method` as the compatible string, so
/// `"spin-table"` selects the spin-table driver.
///
/// This is the input for [`SmpRegistry::resolve`](crate::smp::SmpRegistry::resolve).
pub fn driver_nodes<'b, 'a: 'b>(fdt: &'b Fdt<'a>) -> impl Iterator<Item = DriverNode<'a>> + 'b {
    let compatibles = fdt.all_nodes().flat_map(|node| {
        let method = node.property("method").and_then(|p| p.as_str());
        node.compatible()
            .into_iter()
            .flat_map(|compatible| compatible.all())
            .map(move |compatible| DriverNode { compatible, method, release: None })
    });
    compatibles.chain(release_nodes(fdt))
}

/// Cpu nodes with an `enable-method` and a `cpu-release-addr`.
fn release_nodes<'b, 'a: 'b>(fdt: &'b Fdt<'a>) -> impl Iterator<Item = DriverNode<'a>> + 'b {
    fdt.find_node("/cpus").into_iter().flat_map(|cpus| {
        let address_cells = cpus.cell_sizes().address_cells;
        cpus.children().filter_map(move |node| {
            let compatible = node.property("enable-method")?.as_str()?;
            let hw_id = read_cells(node.property("reg")?.value, address_cells)?;
            let addr = node.property("cpu-release-addr")?.value;
            let addr = read_cells(addr, addr.len() / 4)?;
            Some(DriverNode {
                compatible,
                method: None,
                release: Some(CpuRelease { hw_id, addr: PhysAddr::new(addr) }),
            })
        })
    })
}

#[cfg(test)]
pub(crate) mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;
    use crate::psci::{Conduit, PSCI};
    use crate::smp::{DriverEntry, SmpRegistry};

    /// Minimal flattened device tree writer for tests.
    pub(crate) struct FdtBuilder {
        structs: Vec<u8>,
        strings: Vec<u8>,
    }

    impl FdtBuilder {
        pub(crate) fn new() -> Self {
            Self { structs: Vec::new(), strings: Vec::new() }
        }

        fn word(&mut self, v: u32) {
            self.structs.extend_from_slice(&v.to_be_bytes());
        }

        fn pad(&mut self) {
            while self.structs.len() % 4 != 0 {
                self.structs.push(0);
            }
        }

        pub(crate) fn begin(&mut self, name: &str) -> &mut Self {
            self.word(1);
            self.structs.extend_from_slice(name.as_bytes());
            self.structs.push(0);
            self.pad();
            self
        }

        pub(crate) fn end(&mut self) -> &mut Self {
            self.word(2);
            self
        }

        pub(crate) fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
            let nameoff = self.strings.len() as u32;
            self.strings.extend_from_slice(name.as_bytes());
            self.strings.push(0);
            self.word(3);
            self.word(value.len() as u32);
            self.word(nameoff);
            self.structs.extend_from_slice(value);
            self.pad();
            self
        }

        pub(crate) fn prop_u32(&mut self, name: &str, values: &[u32]) -> &mut Self {
            let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
            self.prop(name, &bytes)
        }

        pub(crate) fn prop_strs(&mut self, name: &str, values: &[&str]) -> &mut Self {
            let mut bytes = Vec::new();
            for v in values {
                bytes.extend_from_slice(v.as_bytes());
                bytes.push(0);
            }
            self.prop(name, &bytes)
        }

        pub(crate) fn finish(&mut self) -> Vec<u8> {
            self.word(9);
            let header_len = 40u32;
            let rsvmap_len = 16u32;
            let off_struct = header_len + rsvmap_len;
            let off_strings = off_struct + self.structs.len() as u32;
            let total = off_strings + self.strings.len() as u32;

            let mut blob = Vec::new();
            for v in [
                0xD00D_FEED,
                total,
                off_struct,
                off_strings,
                header_len,
                17,
                16,
                0,
                self.strings.len() as u32,
                self.structs.len() as u32,
            ] {
                blob.extend_from_slice(&u32::to_be_bytes(v));
            }
            blob.extend_from_slice(&[0u8; 16]);
            blob.extend_from_slice(&self.structs);
            blob.extend_from_slice(&self.strings);
            blob
        }
    }

    fn riscv_tree() -> Vec<u8> {
        let mut b = FdtBuilder::new();
        b.begin("")
            .prop_u32("#address-cells", &[2])
            .prop_u32("#size-cells", &[2])
            .begin("cpus")
            .prop_u32("#address-cells", &[1])
            .prop_u32("#size-cells", &[0]);
        for (hart, status) in [(0u32, "disabled"), (1, "okay"), (2, "okay"), (4, "okay")] {
            b.begin(&std::format!("cpu@{hart}"))
                .prop_strs("device_type", &["cpu"])
                .prop_u32("reg", &[hart])
                .prop_strs("status", &[status])
                .prop_strs("compatible", &["sifive,u54", "riscv"])
                .end();
        }
        b.end().end();
        b.finish()
    }

    fn arm_tree() -> Vec<u8> {
        let mut b = FdtBuilder::new();
        b.begin("")
            .prop_u32("#address-cells", &[2])
            .prop_u32("#size-cells", &[2])
            .begin("psci")
            .prop_strs("compatible", &["arm,psci-1.0", "arm,psci-0.2", "arm,psci"])
            .prop_strs("method", &["smc"])
            .end()
            .begin("cpus")
            .prop_u32("#address-cells", &[2])
            .prop_u32("#size-cells", &[0])
            .begin("cpu@0")
            .prop_u32("reg", &[0, 0])
            .prop_strs("enable-method", &["psci"])
            .end()
            .begin("cpu@100")
            .prop_u32("reg", &[0, 0x100])
            .prop_strs("enable-method", &["psci"])
            .end()
            .end()
            .end();
        b.finish()
    }

    #[test]
    fn test_hw_ids_skip_disabled_harts() {
        let blob = riscv_tree();
        let fdt = from_slice(&blob).unwrap();
        let mut ids = [0u64; 8];
        let n = cpu_hw_ids(&fdt, &mut ids).unwrap();
        assert_eq!(&ids[..n], &[1, 2, 4]);
        assert_eq!(total_size(&fdt), blob.len());
    }

    #[test]
    fn test_hw_ids_two_cells() {
        let blob = arm_tree();
        let fdt = from_slice(&blob).unwrap();
        let mut ids = [0u64; 4];
        let n = cpu_hw_ids(&fdt, &mut ids).unwrap();
        assert_eq!(&ids[..n], &[0, 0x100]);
    }

    #[test]
    fn test_too_many_cores() {
        let blob = riscv_tree();
        let fdt = from_slice(&blob).unwrap();
        let mut ids = [0u64; 2];
        assert_eq!(cpu_hw_ids(&fdt, &mut ids), Err(DtbError::TooManyCores(3)));
    }

    #[test]
    fn test_invalid_blob() {
        assert!(matches!(from_slice(&[0u8; 64]), Err(DtbError::InvalidDtb)));
    }

    #[test]
    fn test_psci_resolved_from_tree() {
        static REGISTRY: SmpRegistry = SmpRegistry::new(&[DriverEntry {
            matches: crate::psci::is_psci,
            driver: &PSCI,
        }]);

        let blob = arm_tree();
        let fdt = from_slice(&blob).unwrap();
        let driver = REGISTRY.resolve(driver_nodes(&fdt)).unwrap();
        assert_eq!(driver.name(), "psci");
        assert_eq!(PSCI.conduit(), Conduit::Smc);
    }

    #[test]
    fn test_driver_nodes_lists_every_compatible() {
        let blob = riscv_tree();
        let fdt = from_slice(&blob).unwrap();
        let nodes: Vec<_> = driver_nodes(&fdt).collect();
        assert_eq!(nodes.len(), 8);
        assert!(nodes.iter().all(|n| n.method.is_none()));
        assert_eq!(nodes.iter().filter(|n| n.compatible == "riscv").count(), 4);
    }
}
