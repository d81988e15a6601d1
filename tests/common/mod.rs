//! Simulated Bryck host
//!
//! A stateful stand-in for the machine a Bryck is plugged into. It answers
//! the command lines the controller issues (nvme-cli, cryptsetup, parted,
//! sfdisk, mdadm, mkfs, mount) from an in-memory model of drives, LUKS
//! headers, partition tables, RAID superblocks and the mount table.
//!
//! Filesystem contents are real directories: every RAID filesystem has a
//! backing directory under the fixture root that is moved onto the mount
//! point on `mount` and back on `umount`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use bryck::adapters::InMemoryEventCollector;
use bryck::domain::ports::{CommandOutput, CommandRunner};
use bryck::hardware::{DriveScanner, ScannerConfig};
use bryck::{BryckConfig, BryckController};

pub const MODEL: &str = "BRYCK-SIM-7T6";
pub const DRIVE_BYTES: u64 = 8 * 1024 * 1024 * 1024;
const DRIVE_MB: f64 = 8192.0;
const HEADER_MAGIC: &str = "SIMLUKS:";

// =============================================================================
// Host Model
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Drive {
    serial: String,
    luks_key: Option<String>,
    header_ok: bool,
    open: bool,
}

#[derive(Debug, Clone, Default)]
struct Table {
    parts: BTreeMap<u32, (f64, f64)>,
}

#[derive(Debug, Clone)]
struct Raid {
    members: Vec<String>,
    level: u8,
    chunk: Option<String>,
    md: u32,
    assembled: bool,
    active: Vec<String>,
    has_fs: bool,
}

#[derive(Debug, Clone)]
struct Mount {
    raid: String,
    md: String,
    path: PathBuf,
}

#[derive(Debug, Default)]
struct HostState {
    drives: BTreeMap<String, Drive>,
    /// Partition tables by block device (raw drive or mapped device)
    tables: BTreeMap<String, Table>,
    /// Partition path -> RAID it belongs to
    superblocks: BTreeMap<String, String>,
    raids: BTreeMap<String, Raid>,
    mounts: Vec<Mount>,
    next_md: u32,
    log: Vec<String>,
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn mapped_path(drive: &str) -> String {
    format!("/dev/mapper/crypt{}", basename(drive))
}

fn read_key(path: &str) -> Option<String> {
    fs::read_to_string(path).ok()
}

fn not_found(path: &str) -> CommandOutput {
    CommandOutput::new(2, "", format!("ls: cannot access '{path}': No such file or directory\n"))
}

impl HostState {
    fn drive_for_mapped(&self, mapped: &str) -> Option<String> {
        self.drives
            .keys()
            .find(|d| mapped_path(d) == mapped)
            .cloned()
    }

    fn block_visible(&self, dev: &str) -> bool {
        if self.drives.contains_key(dev) {
            return true;
        }
        match self.drive_for_mapped(dev) {
            Some(drive) => self.drives[&drive].open,
            None => false,
        }
    }

    fn partition_visible(&self, part: &str) -> bool {
        self.tables.iter().any(|(dev, table)| {
            part.strip_prefix(dev.as_str())
                .and_then(|rest| rest.strip_prefix('p'))
                .and_then(|n| n.parse::<u32>().ok())
                .map(|n| table.parts.contains_key(&n) && self.block_visible(dev))
                .unwrap_or(false)
        })
    }

    fn raid_by_device(&self, dev: &str) -> Option<String> {
        if let Some(raid) = self.raids.get(dev) {
            return raid.assembled.then(|| dev.to_string());
        }
        self.raids
            .iter()
            .find(|(_, r)| r.assembled && format!("/dev/md{}", r.md) == dev)
            .map(|(name, _)| name.clone())
    }

    fn exists(&self, path: &str) -> bool {
        self.block_visible(path) || self.partition_visible(path) || self.raid_by_device(path).is_some()
    }

    fn in_active_raid(&self, prefix: &str) -> bool {
        self.raids
            .values()
            .any(|r| r.assembled && r.active.iter().any(|m| m.starts_with(prefix)))
    }

    fn is_mounted_raid(&self, raid: &str) -> bool {
        self.mounts.iter().any(|m| m.raid == raid)
    }

    fn dump(&self, dev: &str) -> String {
        let mut out = format!("label: gpt\ndevice: {dev}\nunit: MB\n\n");
        for (n, (start, end)) in &self.tables[dev].parts {
            out.push_str(&format!("{dev}p{n} : start={start}, end={end}\n"));
        }
        out
    }
}

/// Stateful simulated host implementing the command runner port.
pub struct SimulatedHost {
    state: Mutex<HostState>,
    fs_root: PathBuf,
}

impl SimulatedHost {
    pub fn new(drive_count: usize, root: &Path) -> Arc<Self> {
        let fs_root = root.join("host-fs");
        fs::create_dir_all(&fs_root).unwrap();

        let mut state = HostState {
            next_md: 127,
            ..Default::default()
        };
        for i in 0..drive_count {
            state.drives.insert(
                format!("/dev/nvme{i}n1"),
                Drive {
                    serial: format!("SIM{i:04}"),
                    ..Default::default()
                },
            );
        }
        Arc::new(Self {
            state: Mutex::new(state),
            fs_root,
        })
    }

    // =========================================================================
    // Inspection and fault injection
    // =========================================================================

    pub fn drive_paths(&self) -> Vec<String> {
        self.state.lock().drives.keys().cloned().collect()
    }

    /// Damage the LUKS header so the drive no longer opens.
    pub fn corrupt_header(&self, drive: &str) {
        self.state.lock().drives.get_mut(drive).unwrap().header_ok = false;
    }

    /// Drop the partition table of a block device; partition contents
    /// (and their RAID superblocks) survive.
    pub fn wipe_partition_table(&self, dev: &str) {
        self.state.lock().tables.remove(dev);
    }

    pub fn is_open(&self, drive: &str) -> bool {
        self.state.lock().drives[drive].open
    }

    pub fn any_open(&self) -> bool {
        self.state.lock().drives.values().any(|d| d.open)
    }

    pub fn is_luks(&self, drive: &str) -> bool {
        self.state.lock().drives[drive].luks_key.is_some()
    }

    pub fn raid_assembled(&self, raid: &str) -> bool {
        self.state
            .lock()
            .raids
            .get(raid)
            .map(|r| r.assembled)
            .unwrap_or(false)
    }

    pub fn active_members(&self, raid: &str) -> usize {
        self.state
            .lock()
            .raids
            .get(raid)
            .map(|r| if r.assembled { r.active.len() } else { 0 })
            .unwrap_or(0)
    }

    pub fn raid_level(&self, raid: &str) -> Option<u8> {
        self.state.lock().raids.get(raid).map(|r| r.level)
    }

    pub fn raid_chunk(&self, raid: &str) -> Option<String> {
        self.state.lock().raids.get(raid).and_then(|r| r.chunk.clone())
    }

    pub fn mounted_at(&self, path: &Path) -> bool {
        self.state.lock().mounts.iter().any(|m| m.path == path)
    }

    /// Directory holding a RAID filesystem's contents while unmounted.
    pub fn filesystem_dir(&self, raid: &str) -> PathBuf {
        self.fs_root.join(basename(raid))
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn ran(&self, fragment: &str) -> bool {
        self.state.lock().log.iter().any(|c| c.contains(fragment))
    }

    pub fn count(&self, fragment: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|c| c.contains(fragment))
            .count()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    // =========================================================================
    // Command dispatch
    // =========================================================================

    fn dispatch(&self, s: &mut HostState, cmd: &str) -> CommandOutput {
        let t: Vec<&str> = cmd.split_whitespace().collect();
        match t.as_slice() {
            ["nvme", "list", "-o", "json"] => self.nvme_list(s),
            ["nvme", "format", .., drive] | ["blkdiscard", drive] => Self::erase(s, drive),
            ["blkid", drive] => Self::blkid(s, drive),
            ["cryptsetup", "-q", "luksFormat", drive, key] => Self::luks_format(s, drive, key),
            ["cryptsetup", "open", "--key-file", key, drive, _] => Self::luks_open(s, drive, key),
            ["cryptsetup", "close", name] | ["cryptsetup", "remove", name] => {
                Self::luks_close(s, name)
            }
            ["cryptsetup", "luksChangeKey", drive, "--key-file", old, new] => {
                Self::luks_change_key(s, drive, old, new)
            }
            ["cryptsetup", "luksHeaderBackup", drive, "--header-backup-file", file] => {
                Self::header_backup(s, drive, file)
            }
            ["cryptsetup", "luksDump", file] => match fs::read_to_string(file) {
                Ok(text) if text.starts_with(HEADER_MAGIC) => {
                    CommandOutput::ok_with("LUKS header information\n")
                }
                _ => CommandOutput::failed(format!("Device {file} is not a valid LUKS device.\n")),
            },
            ["cryptsetup", "-q", "luksHeaderRestore", drive, "--header-backup-file", file] => {
                Self::header_restore(s, drive, file)
            }
            ["dmsetup", "remove", _] | ["partprobe", ..] => CommandOutput::ok(),
            ["ls", "-l", raid] => match s.raids.get(*raid) {
                Some(r) if r.assembled => CommandOutput::ok_with(format!(
                    "lrwxrwxrwx 1 root root 8 Jan  1 00:00 {raid} -> ../md{}\n",
                    r.md
                )),
                _ => not_found(raid),
            },
            ["ls", glob] if glob.ends_with("p*") => {
                let dev = glob.trim_end_matches("p*");
                match s.tables.get(dev) {
                    Some(table) if s.block_visible(dev) && !table.parts.is_empty() => {
                        let names: Vec<String> =
                            table.parts.keys().map(|n| format!("{dev}p{n}")).collect();
                        CommandOutput::ok_with(names.join("  ") + "\n")
                    }
                    _ => not_found(glob),
                }
            }
            ["ls", paths @ ..] => match paths.iter().find(|p| !s.exists(p)) {
                Some(missing) => not_found(missing),
                None => CommandOutput::ok_with(paths.join("\n") + "\n"),
            },
            ["test", "-e", path] => {
                if s.exists(path) {
                    CommandOutput::ok()
                } else {
                    CommandOutput::new(1, "", "")
                }
            }
            ["parted", "-s", dev, rest @ ..] => Self::parted(s, dev, rest),
            ["sfdisk", "-d", dev] => match s.tables.get(*dev) {
                Some(_) if s.block_visible(dev) => CommandOutput::ok_with(s.dump(dev)),
                _ => CommandOutput::failed(format!("sfdisk: {dev}: does not contain a recognized partition table\n")),
            },
            ["sfdisk", dev, "<", file] => Self::sfdisk_apply(s, dev, file),
            ["mdadm", "--stop", raid] => Self::mdadm_stop(s, raid),
            ["mdadm", "--zero-superblock", members @ ..] => Self::zero_superblock(s, members),
            ["mdadm", "--assemble", "--scan"] => Self::assemble(s),
            ["mdadm", "--examine", "--scan", ..] => CommandOutput::ok(),
            ["mdadm", "--detail", raid] => match s.raid_by_device(raid) {
                Some(name) => CommandOutput::ok_with(format!(
                    "{raid}:\n        Raid Level : raid{}\n",
                    s.raids[&name].level
                )),
                None => CommandOutput::failed(format!("mdadm: cannot open {raid}: No such file or directory\n")),
            },
            ["mdadm", "--examine", member] => {
                let level = s
                    .superblocks
                    .get(*member)
                    .filter(|_| s.partition_visible(member))
                    .and_then(|name| s.raids.get(name))
                    .map(|r| r.level);
                match level {
                    Some(level) => CommandOutput::ok_with(format!(
                        "{member}:\n     Raid Level : raid{level}\n"
                    )),
                    None => CommandOutput::failed(format!("mdadm: No md superblock detected on {member}.\n")),
                }
            }
            ["yes", "|", "mdadm", "--create", raid, args @ ..] => Self::mdadm_create(s, raid, args),
            ["mkfs.xfs", .., raid] => self.mkfs(s, raid),
            ["mkdir", "-p", path] => match fs::create_dir_all(path) {
                Ok(()) => CommandOutput::ok(),
                Err(e) => CommandOutput::failed(e.to_string()),
            },
            ["chmod", ..] | ["sync"] | ["sysctl", ..] => CommandOutput::ok(),
            ["mount", dev, path] => self.mount(s, dev, path),
            ["umount", target] => self.umount(s, target),
            ["cat", "/proc/mounts"] => CommandOutput::ok_with(
                s.mounts
                    .iter()
                    .map(|m| format!("{} {} xfs rw,relatime 0 0\n", m.md, m.path.display()))
                    .collect::<String>(),
            ),
            ["df", target] => {
                let target = Path::new(target);
                match s
                    .mounts
                    .iter()
                    .find(|m| m.path == target || Path::new(&m.raid) == target)
                {
                    Some(m) => CommandOutput::ok_with(format!(
                        "Filesystem     1K-blocks    Used Available Use% Mounted on\n\
                         {} 20971520 2097152 18874368  10% {}\n",
                        m.md,
                        m.path.display()
                    )),
                    None => CommandOutput::failed("df: no file systems processed\n"),
                }
            }
            _ => CommandOutput::new(127, "", format!("simulated host: unknown command: {cmd}\n")),
        }
    }

    fn nvme_list(&self, s: &HostState) -> CommandOutput {
        let mut devices: Vec<serde_json::Value> = s
            .drives
            .iter()
            .map(|(path, d)| {
                serde_json::json!({
                    "NameSpace": 1,
                    "DevicePath": path,
                    "Firmware": "SIM1.0  ",
                    "ModelNumber": format!("{MODEL}   "),
                    "SerialNumber": d.serial,
                    "PhysicalSize": DRIVE_BYTES,
                })
            })
            .collect();
        devices.push(serde_json::json!({
            "NameSpace": 1,
            "DevicePath": "/dev/nvme9n1",
            "Firmware": "OS1",
            "ModelNumber": "BOOT-DISK",
            "SerialNumber": "OS0001",
            "PhysicalSize": DRIVE_BYTES,
        }));
        CommandOutput::ok_with(serde_json::json!({ "Devices": devices }).to_string())
    }

    fn erase(s: &mut HostState, drive: &str) -> CommandOutput {
        let mapped = mapped_path(drive);
        let Some(d) = s.drives.get_mut(drive) else {
            return CommandOutput::failed(format!("{drive}: No such device\n"));
        };
        if d.open {
            return CommandOutput::failed("Device or resource busy\n");
        }
        d.luks_key = None;
        d.header_ok = false;
        s.tables.remove(drive);
        s.tables.remove(&mapped);
        s.superblocks
            .retain(|part, _| !part.starts_with(drive) && !part.starts_with(&mapped));
        CommandOutput::ok()
    }

    fn blkid(s: &HostState, drive: &str) -> CommandOutput {
        match s.drives.get(drive) {
            Some(d) if d.luks_key.is_some() && d.header_ok => CommandOutput::ok_with(format!(
                "{drive}: UUID=\"sim-{}\" TYPE=\"crypto_LUKS\"\n",
                d.serial
            )),
            _ => CommandOutput::new(2, "", ""),
        }
    }

    fn luks_format(s: &mut HostState, drive: &str, key: &str) -> CommandOutput {
        let Some(key) = read_key(key) else {
            return CommandOutput::failed("Failed to open key file.\n");
        };
        let mapped = mapped_path(drive);
        let Some(d) = s.drives.get_mut(drive) else {
            return CommandOutput::failed(format!("Device {drive} does not exist.\n"));
        };
        if d.open {
            return CommandOutput::failed(format!("Cannot format device {drive} in use.\n"));
        }
        d.luks_key = Some(key);
        d.header_ok = true;
        s.tables.remove(&mapped);
        s.superblocks.retain(|part, _| !part.starts_with(&mapped));
        CommandOutput::ok()
    }

    fn luks_open(s: &mut HostState, drive: &str, key: &str) -> CommandOutput {
        let key = read_key(key);
        let Some(d) = s.drives.get_mut(drive) else {
            return CommandOutput::failed(format!("Device {drive} does not exist.\n"));
        };
        if d.luks_key.is_none() || !d.header_ok {
            return CommandOutput::failed(format!("Device {drive} is not a valid LUKS device.\n"));
        }
        if d.open {
            return CommandOutput::failed(format!("Device {} already exists.\n", mapped_path(drive)));
        }
        match key {
            None => CommandOutput::failed("Failed to open key file.\n"),
            Some(key) if Some(&key) != d.luks_key.as_ref() => {
                CommandOutput::failed("No key available with this passphrase.\n")
            }
            Some(_) => {
                d.open = true;
                CommandOutput::ok()
            }
        }
    }

    fn luks_close(s: &mut HostState, name: &str) -> CommandOutput {
        let mapped = format!("/dev/mapper/{name}");
        let Some(drive) = s.drive_for_mapped(&mapped) else {
            return CommandOutput::failed(format!("Device {name} is not active.\n"));
        };
        if !s.drives[&drive].open {
            return CommandOutput::failed(format!("Device {name} is not active.\n"));
        }
        if s.in_active_raid(&mapped) {
            return CommandOutput::failed(format!("Device {name} is still in use.\n"));
        }
        s.drives.get_mut(&drive).unwrap().open = false;
        CommandOutput::ok()
    }

    fn luks_change_key(s: &mut HostState, drive: &str, old: &str, new: &str) -> CommandOutput {
        let (Some(old), Some(new)) = (read_key(old), read_key(new)) else {
            return CommandOutput::failed("Failed to open key file.\n");
        };
        match s.drives.get_mut(drive) {
            Some(d) if d.header_ok && d.luks_key.as_ref() == Some(&old) => {
                d.luks_key = Some(new);
                CommandOutput::ok()
            }
            Some(d) if d.header_ok && d.luks_key.is_some() => {
                CommandOutput::failed("No key available with this passphrase.\n")
            }
            _ => CommandOutput::failed(format!("Device {drive} is not a valid LUKS device.\n")),
        }
    }

    fn header_backup(s: &HostState, drive: &str, file: &str) -> CommandOutput {
        let Some(d) = s.drives.get(drive) else {
            return CommandOutput::failed(format!("Device {drive} does not exist.\n"));
        };
        let Some(key) = d.luks_key.as_ref().filter(|_| d.header_ok) else {
            return CommandOutput::failed(format!("Device {drive} is not a valid LUKS device.\n"));
        };
        if Path::new(file).exists() {
            return CommandOutput::failed(format!("Requested header backup file {file} already exists.\n"));
        }
        match fs::write(file, format!("{HEADER_MAGIC}{key}")) {
            Ok(()) => CommandOutput::ok(),
            Err(e) => CommandOutput::failed(e.to_string()),
        }
    }

    fn header_restore(s: &mut HostState, drive: &str, file: &str) -> CommandOutput {
        let key = match fs::read_to_string(file) {
            Ok(text) => match text.strip_prefix(HEADER_MAGIC) {
                Some(key) => key.to_string(),
                None => return CommandOutput::failed("Backup file does not contain a valid LUKS header.\n"),
            },
            Err(e) => return CommandOutput::failed(e.to_string()),
        };
        match s.drives.get_mut(drive) {
            Some(d) if !d.open => {
                d.luks_key = Some(key);
                d.header_ok = true;
                CommandOutput::ok()
            }
            Some(_) => CommandOutput::failed(format!("Cannot restore header on {drive}: device in use.\n")),
            None => CommandOutput::failed(format!("Device {drive} does not exist.\n")),
        }
    }

    fn parted(s: &mut HostState, dev: &str, rest: &[&str]) -> CommandOutput {
        if !s.block_visible(dev) {
            return CommandOutput::failed(format!("Error: Could not stat device {dev}\n"));
        }
        match rest {
            ["mklabel", "gpt"] => {
                s.tables.insert(dev.to_string(), Table::default());
                CommandOutput::ok()
            }
            ["unit", "MB", "print", "free", ..] => match s.tables.get(dev) {
                Some(table) => {
                    let start = table
                        .parts
                        .values()
                        .map(|(_, end)| *end)
                        .fold(0.02_f64, f64::max);
                    CommandOutput::ok_with(format!(
                        "        {start}MB  {DRIVE_MB}MB  {}MB  Free Space\n",
                        DRIVE_MB - start
                    ))
                }
                None => CommandOutput::failed(format!("Error: {dev}: unrecognised disk label\n")),
            },
            ["mkpart", "primary", start, end] => {
                let parse = |v: &str| v.trim_end_matches("MB").parse::<f64>().ok();
                let (Some(start), Some(end)) = (parse(*start), parse(*end)) else {
                    return CommandOutput::failed("Error: invalid partition bounds\n");
                };
                let Some(table) = s.tables.get_mut(dev) else {
                    return CommandOutput::failed(format!("Error: {dev}: unrecognised disk label\n"));
                };
                if end > DRIVE_MB {
                    return CommandOutput::failed("Error: partition exceeds device\n");
                }
                let number = table.parts.keys().max().copied().unwrap_or(0) + 1;
                table.parts.insert(number, (start, end));
                CommandOutput::ok()
            }
            ["print", ..] => match s.tables.get(dev) {
                Some(table) => CommandOutput::ok_with(
                    table
                        .parts
                        .keys()
                        .map(|n| format!("{n}\n"))
                        .collect::<String>(),
                ),
                None => CommandOutput::ok(),
            },
            ["rm", number] => {
                let removed = number
                    .parse::<u32>()
                    .ok()
                    .and_then(|n| s.tables.get_mut(dev).and_then(|t| t.parts.remove(&n)));
                match removed {
                    Some(_) => CommandOutput::ok(),
                    None => CommandOutput::failed(format!("Error: Partition {number} doesn't exist.\n")),
                }
            }
            _ => CommandOutput::failed("Error: unsupported parted command\n"),
        }
    }

    fn sfdisk_apply(s: &mut HostState, dev: &str, file: &str) -> CommandOutput {
        if !s.block_visible(dev) {
            return CommandOutput::failed(format!("sfdisk: cannot open {dev}\n"));
        }
        let Ok(text) = fs::read_to_string(file) else {
            return CommandOutput::failed(format!("sfdisk: cannot read {file}\n"));
        };
        let mut table = Table::default();
        for line in text.lines().filter(|l| l.contains(" : start=")) {
            let (name, bounds) = line.split_once(" : ").unwrap();
            let number: u32 = name.trim().rsplit('p').next().unwrap().parse().unwrap();
            let mut start = 0.0;
            let mut end = 0.0;
            for field in bounds.split(',') {
                let (k, v) = field.trim().split_once('=').unwrap();
                match k {
                    "start" => start = v.parse().unwrap(),
                    "end" => end = v.parse().unwrap(),
                    _ => {}
                }
            }
            table.parts.insert(number, (start, end));
        }
        s.tables.insert(dev.to_string(), table);
        CommandOutput::ok()
    }

    fn mdadm_stop(s: &mut HostState, raid: &str) -> CommandOutput {
        let mounted = s.is_mounted_raid(raid);
        match s.raids.get_mut(raid) {
            Some(_) if mounted => {
                CommandOutput::failed(format!("mdadm: Cannot get exclusive access to {raid}\n"))
            }
            Some(r) if r.assembled => {
                r.assembled = false;
                r.active.clear();
                CommandOutput::ok()
            }
            _ => CommandOutput::failed(format!("mdadm: error opening {raid}: No such file or directory\n")),
        }
    }

    fn zero_superblock(s: &mut HostState, members: &[&str]) -> CommandOutput {
        let mut stderr = String::new();
        for member in members {
            if !s.exists(member) {
                stderr.push_str(&format!("mdadm: Couldn't open {member} for write - not zeroing\n"));
            } else if s.in_active_raid(member) {
                stderr.push_str(&format!("mdadm: Couldn't open {member} for write - device busy\n"));
            } else if s.superblocks.remove(*member).is_none() {
                stderr.push_str(&format!("mdadm: Unrecognised md component device - {member}\n"));
            }
        }
        if stderr.is_empty() {
            CommandOutput::ok()
        } else {
            CommandOutput::failed(stderr)
        }
    }

    fn mdadm_create(s: &mut HostState, raid: &str, args: &[&str]) -> CommandOutput {
        let mut level = None;
        let mut chunk = None;
        let mut members = Vec::new();
        for arg in args {
            if let Some(l) = arg.strip_prefix("--level=") {
                level = l.parse::<u8>().ok();
            } else if let Some(c) = arg.strip_prefix("--chunk=") {
                chunk = Some(c.to_string());
            } else if !arg.starts_with("--") {
                members.push(arg.to_string());
            }
        }
        let Some(level) = level else {
            return CommandOutput::failed("mdadm: no raid level given\n");
        };
        if let Some(missing) = members.iter().find(|m| !s.partition_visible(m)) {
            return CommandOutput::failed(format!("mdadm: cannot open {missing}: No such file or directory\n"));
        }
        if s.raids.get(raid).map(|r| r.assembled).unwrap_or(false) {
            return CommandOutput::failed(format!("mdadm: {raid} is already active\n"));
        }
        for m in &members {
            s.superblocks.insert(m.clone(), raid.to_string());
        }
        let md = s.next_md;
        s.next_md -= 1;
        s.raids.insert(
            raid.to_string(),
            Raid {
                active: members.clone(),
                members,
                level,
                chunk,
                md,
                assembled: true,
                has_fs: false,
            },
        );
        CommandOutput::ok_with(format!("mdadm: array {raid} started.\n"))
    }

    fn assemble(s: &mut HostState) -> CommandOutput {
        let mut started = false;
        let names: Vec<String> = s.raids.keys().cloned().collect();
        for name in names {
            let raid = &s.raids[&name];
            if raid.assembled {
                continue;
            }
            let active: Vec<String> = raid
                .members
                .iter()
                .filter(|m| s.partition_visible(m) && s.superblocks.get(*m) == Some(&name))
                .cloned()
                .collect();
            let n = raid.members.len();
            let required = match raid.level {
                1 => 1,
                5 => n.saturating_sub(1),
                6 => n.saturating_sub(2),
                _ => n,
            };
            if !active.is_empty() && active.len() >= required {
                let raid = s.raids.get_mut(&name).unwrap();
                raid.assembled = true;
                raid.active = active;
                started = true;
            }
        }
        if started {
            CommandOutput::ok()
        } else {
            CommandOutput::failed("mdadm: No arrays found in config file or automatically\n")
        }
    }

    fn mkfs(&self, s: &mut HostState, raid: &str) -> CommandOutput {
        let Some(name) = s.raid_by_device(raid) else {
            return CommandOutput::failed(format!("mkfs.xfs: cannot open {raid}\n"));
        };
        let dir = self.filesystem_dir(&name);
        if dir.exists() {
            fs::remove_dir_all(&dir).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        s.raids.get_mut(&name).unwrap().has_fs = true;
        CommandOutput::ok()
    }

    fn mount(&self, s: &mut HostState, dev: &str, path: &str) -> CommandOutput {
        let Some(name) = s.raid_by_device(dev) else {
            return CommandOutput::failed(format!("mount: {path}: special device {dev} does not exist.\n"));
        };
        if !s.raids[&name].has_fs {
            return CommandOutput::failed(format!("mount: {path}: wrong fs type on {dev}.\n"));
        }
        if s.is_mounted_raid(&name) {
            return CommandOutput::failed(format!("mount: {path}: {dev} already mounted.\n"));
        }
        let target = PathBuf::from(path);
        if fs::remove_dir(&target).is_err() {
            return CommandOutput::failed(format!("mount: {path}: mount point not empty or missing.\n"));
        }
        fs::rename(self.filesystem_dir(&name), &target).unwrap();
        let md = format!("/dev/md{}", s.raids[&name].md);
        s.mounts.push(Mount {
            raid: name,
            md,
            path: target,
        });
        CommandOutput::ok()
    }

    fn umount(&self, s: &mut HostState, target: &str) -> CommandOutput {
        let by_raid = s.raid_by_device(target);
        let Some(idx) = s.mounts.iter().position(|m| {
            m.path == Path::new(target) || m.md == target || Some(&m.raid) == by_raid.as_ref()
        }) else {
            return CommandOutput::failed(format!("umount: {target}: not mounted.\n"));
        };
        let mount = s.mounts.remove(idx);
        fs::rename(&mount.path, self.filesystem_dir(&mount.raid)).unwrap();
        fs::create_dir(&mount.path).unwrap();
        CommandOutput::ok()
    }
}

#[async_trait]
impl CommandRunner for SimulatedHost {
    async fn execute(&self, command: &str) -> CommandOutput {
        let mut state = self.state.lock();
        state.log.push(command.to_string());
        self.dispatch(&mut state, command)
    }
}

// =============================================================================
// Fixture
// =============================================================================

/// A simulated host plus the configuration, scratch space and event sink a
/// controller needs.
pub struct Fixture {
    pub dir: TempDir,
    pub host: Arc<SimulatedHost>,
    pub events: Arc<InMemoryEventCollector>,
    pub config: BryckConfig,
}

impl Fixture {
    pub fn new(drive_count: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let host = SimulatedHost::new(drive_count, dir.path());
        let tmp = dir.path().join("tmp");
        fs::create_dir_all(&tmp).unwrap();

        let config = BryckConfig {
            drive_models: vec![MODEL.to_string()],
            metadata_mount: dir.path().join("meta"),
            tmp_dir: tmp,
            max_workers: Some(4),
            device_wait_timeout_ms: 200,
            device_wait_interval_ms: 1,
            ..Default::default()
        };

        Self {
            dir,
            host,
            events: Arc::new(InMemoryEventCollector::new()),
            config,
        }
    }

    /// Write a key file and return its path.
    pub fn key(&self, name: &str, secret: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, secret).unwrap();
        path
    }

    /// Create an empty directory to mount the Bryck on.
    pub fn mount_dir(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::create_dir_all(&path).unwrap();
        path
    }

    /// Metadata filesystem contents while the Bryck is ejected.
    pub fn metadata_dir(&self) -> PathBuf {
        self.host.filesystem_dir(&self.config.metadata_raid_device)
    }

    /// Discover the simulated drives and build a controller over them.
    pub async fn controller(&self) -> BryckController {
        let scanner = DriveScanner::new(ScannerConfig::from_config(&self.config), self.host.clone());
        BryckController::discover(
            self.config.clone(),
            self.host.clone(),
            &scanner,
            self.events.clone(),
        )
        .await
        .unwrap()
    }
}
