// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// SHM-backed table of well-known bus name claims.
//
// One segment per bus domain. Each entry records which process currently
// owns a name and whether that claim may be replaced. Dead owners (their
// PID no longer maps to a live process) are evicted whenever an entry is
// touched; live owners are evicted only under the replacement policy.

use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bus::OwnershipPolicy;
use crate::shm::ShmHandle;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const MAX_NAMES: usize = 32;
pub const MAX_NAME_LEN: usize = 64;

/// Entry flag: the owner requested primary-allow-replacement, so a later
/// claimant carrying the same policy may evict it even while it is alive.
const FLAG_ALLOW_REPLACEMENT: u32 = 1 << 0;

// ---------------------------------------------------------------------------
// Shared memory layout
// ---------------------------------------------------------------------------

/// A single name claim in the shared table.
#[repr(C)]
#[derive(Clone)]
pub struct NameEntry {
    /// The well-known name (null-terminated).
    pub name: [u8; MAX_NAME_LEN],
    /// PID of the owning process.
    pub pid: i32,
    /// Unix timestamp (seconds) when the claim was granted.
    pub claimed_at: i64,
    /// Claim flags (FLAG_ALLOW_REPLACEMENT).
    pub flags: u32,
}

impl NameEntry {
    pub fn active(&self) -> bool {
        self.pid > 0 && self.name[0] != 0
    }

    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn is_alive(&self) -> bool {
        if self.pid <= 0 {
            return false;
        }
        is_pid_alive(self.pid)
    }

    pub fn replaceable(&self) -> bool {
        self.flags & FLAG_ALLOW_REPLACEMENT != 0
    }
}

impl Default for NameEntry {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// Shared memory layout for the claim table.
#[repr(C)]
struct TableData {
    spinlock: AtomicI32,
    count: u32,
    entries: [NameEntry; MAX_NAMES],
}

impl TableData {
    fn lock(&self) {
        while self
            .spinlock
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn unlock(&self) {
        self.spinlock.store(0, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Platform: is_pid_alive / current_pid
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn is_pid_alive(pid: i32) -> bool {
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM still means the process exists; only ESRCH means it is gone.
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(windows)]
fn is_pid_alive(pid: i32) -> bool {
    use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };
    unsafe {
        let h = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid as u32);
        if h == 0 {
            return false;
        }
        let mut code: u32 = 0;
        let ok = GetExitCodeProcess(h, &mut code) != 0 && code == STILL_ACTIVE;
        CloseHandle(h);
        ok
    }
}

#[cfg(not(any(unix, windows)))]
fn is_pid_alive(_pid: i32) -> bool {
    true
}

fn current_pid() -> i32 {
    std::process::id() as i32
}

// ---------------------------------------------------------------------------
// ClaimOutcome
// ---------------------------------------------------------------------------

/// Result of a single claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The name was free (or its previous owner was dead) and is now ours.
    Acquired,
    /// A live owner was evicted under the replacement policy.
    Replaced,
    /// A live owner holds the name and the policy did not permit eviction,
    /// or the table is full.
    Refused,
}

impl ClaimOutcome {
    pub fn granted(self) -> bool {
        self != Self::Refused
    }
}

// ---------------------------------------------------------------------------
// NameRegistry
// ---------------------------------------------------------------------------

/// Claim table backed by a well-known shared memory segment.
///
/// Any process that opens a `NameRegistry` with the same domain sees the
/// same set of claims.
pub struct NameRegistry {
    _shm: ShmHandle,
    data: *mut TableData,
}

unsafe impl Send for NameRegistry {}
unsafe impl Sync for NameRegistry {}

impl NameRegistry {
    fn shm_name(domain: &str) -> String {
        if domain.is_empty() {
            "__bus_names__default".to_owned()
        } else {
            format!("__bus_names__{domain}")
        }
    }

    /// Open or create the claim table for `domain`.
    pub fn open(domain: &str) -> io::Result<Self> {
        let name = Self::shm_name(domain);
        let shm = ShmHandle::acquire(&name, std::mem::size_of::<TableData>())?;
        let data = shm.get() as *mut TableData;
        Ok(Self { _shm: shm, data })
    }

    fn table(&self) -> &TableData {
        unsafe { &*self.data }
    }

    fn fill_entry(e: &mut NameEntry, name: &str, pid: i32, policy: OwnershipPolicy) {
        *e = NameEntry::default();
        copy_str(&mut e.name, name);
        e.pid = pid;
        e.claimed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        e.flags = match policy {
            OwnershipPolicy::Default => 0,
            OwnershipPolicy::PrimaryAllowReplacement => FLAG_ALLOW_REPLACEMENT,
        };
    }

    /// Claim `name` for the calling process.
    pub fn claim(&self, name: &str, policy: OwnershipPolicy) -> ClaimOutcome {
        self.claim_as(name, policy, current_pid())
    }

    /// Claim with an explicit PID (useful for testing).
    pub fn claim_as(&self, name: &str, policy: OwnershipPolicy, pid: i32) -> ClaimOutcome {
        if name.is_empty() {
            return ClaimOutcome::Refused;
        }
        let table = self.table();
        table.lock();
        let entries = unsafe { &mut (*self.data).entries };

        for e in entries.iter_mut() {
            if e.active() && e.name_str() == name {
                if e.pid == pid {
                    // Re-claim by the current owner is a success, not a
                    // conflict; refresh the flags in case the policy changed.
                    Self::fill_entry(e, name, pid, policy);
                    table.unlock();
                    return ClaimOutcome::Acquired;
                }
                if e.is_alive() {
                    // A live owner. Eviction needs both sides to opt in:
                    // the prior claim must be replaceable and the new
                    // request must carry the replacement policy.
                    if policy == OwnershipPolicy::PrimaryAllowReplacement && e.replaceable() {
                        Self::fill_entry(e, name, pid, policy);
                        table.unlock();
                        return ClaimOutcome::Replaced;
                    }
                    table.unlock();
                    return ClaimOutcome::Refused;
                }
                // Owner is gone (wedged process finally died, or never
                // released); take over its slot.
                Self::fill_entry(e, name, pid, policy);
                table.unlock();
                return ClaimOutcome::Acquired;
            }
        }

        // Find an empty or stale slot.
        for e in entries.iter_mut() {
            if !e.active() || !e.is_alive() {
                Self::fill_entry(e, name, pid, policy);
                unsafe {
                    let count = &mut (*self.data).count;
                    if (*count as usize) < MAX_NAMES {
                        *count += 1;
                    }
                }
                table.unlock();
                return ClaimOutcome::Acquired;
            }
        }

        table.unlock();
        ClaimOutcome::Refused // table full
    }

    /// Release a claim. Only the owning PID can release.
    pub fn release(&self, name: &str) -> bool {
        self.release_as(name, current_pid())
    }

    /// Release with an explicit PID.
    pub fn release_as(&self, name: &str, pid: i32) -> bool {
        let table = self.table();
        table.lock();
        let entries = unsafe { &mut (*self.data).entries };
        for e in entries.iter_mut() {
            if e.active() && e.name_str() == name && e.pid == pid {
                *e = NameEntry::default();
                table.unlock();
                return true;
            }
        }
        table.unlock();
        false
    }

    /// Look up the current owner of `name`. Returns a copy if the claim is
    /// held by a live process; stale claims are cleaned on contact.
    pub fn owner_of(&self, name: &str) -> Option<NameEntry> {
        let table = self.table();
        table.lock();
        let entries = unsafe { &mut (*self.data).entries };
        let mut result = None;
        for e in entries.iter_mut() {
            if e.active() && e.name_str() == name {
                if !e.is_alive() {
                    *e = NameEntry::default();
                    continue;
                }
                result = Some(e.clone());
                break;
            }
        }
        table.unlock();
        result
    }

    /// List all live claims.
    pub fn list(&self) -> Vec<NameEntry> {
        let table = self.table();
        table.lock();
        let entries = unsafe { &mut (*self.data).entries };
        let mut result = Vec::new();
        for e in entries.iter_mut() {
            if !e.active() {
                continue;
            }
            if !e.is_alive() {
                *e = NameEntry::default();
                continue;
            }
            result.push(e.clone());
        }
        table.unlock();
        result
    }

    /// Remove all claims held by dead processes. Returns count removed.
    pub fn gc(&self) -> usize {
        let table = self.table();
        table.lock();
        let entries = unsafe { &mut (*self.data).entries };
        let mut removed = 0;
        for e in entries.iter_mut() {
            if e.active() && !e.is_alive() {
                *e = NameEntry::default();
                removed += 1;
            }
        }
        table.unlock();
        removed
    }

    /// Clear the entire table.
    pub fn clear(&self) {
        let table = self.table();
        table.lock();
        unsafe {
            let entries = &mut (*self.data).entries;
            for e in entries.iter_mut() {
                *e = NameEntry::default();
            }
            (*self.data).count = 0;
        }
        table.unlock();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn copy_str(dst: &mut [u8; MAX_NAME_LEN], src: &str) {
    let bytes = src.as_bytes();
    let len = bytes.len().min(MAX_NAME_LEN - 1);
    dst[..len].copy_from_slice(&bytes[..len]);
    dst[len] = 0;
}
