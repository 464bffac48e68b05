//! User-pointer validation (part of C9's syscall boundary): translates an
//! address a process passed into a syscall through that process's own
//! page tables into a kernel-writable alias, or rejects it.

use super::page_table::PageMapper;
use super::PageFlags;
use crate::error::{KernelError, KernelResult};

/// Translate `(user_va, len)` in `mapper`'s address space into a kernel
/// pointer, verifying every page in the span is present and
/// unprivileged-accessible (and writable, when `want_write` is set).
///
/// Fails with [`KernelError::BadParameter`] if any page in the span is
/// unmapped, a kernel-only page, or (when `want_write`) read-only — a
/// process has no business handing the kernel a pointer it could not
/// legitimately use itself.
pub fn translate(
    mapper: &PageMapper,
    user_va: u64,
    len: usize,
    want_write: bool,
) -> KernelResult<*mut u8> {
    if len == 0 {
        return Err(KernelError::BadParameter);
    }
    let page_size = super::FRAME_SIZE as u64;
    let first_page = user_va & !(page_size - 1);
    let last_byte = user_va.checked_add(len as u64 - 1).ok_or(KernelError::BadParameter)?;
    let last_page = last_byte & !(page_size - 1);

    let mut page = first_page;
    loop {
        let entry = mapper.get_pte(page).ok_or(KernelError::BadParameter)?;
        if !entry.is_present() {
            return Err(KernelError::BadParameter);
        }
        let flags = entry.flags();
        if !flags.contains(PageFlags::UNPRIVILEGED) {
            return Err(KernelError::BadParameter);
        }
        if want_write && !flags.contains(PageFlags::WRITABLE) {
            return Err(KernelError::BadParameter);
        }
        if page == last_page {
            break;
        }
        page += page_size;
    }

    let frame = mapper.get_pte(first_page).and_then(|e| e.frame()).ok_or(KernelError::BadParameter)?;
    let offset = user_va - first_page;
    Ok((super::phys_to_virt(frame.as_addr()) + offset) as *mut u8)
}

#[cfg(all(test, target_os = "none"))]
mod tests {
    use super::*;
    use crate::mm::page_table::PageMapper;

    #[test]
    fn rejects_unmapped_address() {
        let mapper = PageMapper::new_empty().unwrap();
        assert!(translate(&mapper, 0x4000_0000, 8, false).is_err());
    }

    #[test]
    fn rejects_zero_length() {
        let mapper = PageMapper::new_empty().unwrap();
        assert!(translate(&mapper, 0x4000_0000, 0, false).is_err());
    }

    #[test]
    fn accepts_mapped_writable_page() {
        let mapper = PageMapper::new_empty().unwrap();
        let va = 0x4000_0000u64;
        mapper
            .map_page(va, None, PageFlags::WRITABLE | PageFlags::UNPRIVILEGED)
            .unwrap();
        mapper.load_page(va).unwrap();
        assert!(translate(&mapper, va + 4, 8, true).is_ok());
    }
}
