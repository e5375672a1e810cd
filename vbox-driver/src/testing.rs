//! In-memory stand-in for the hypervisor CLI.
//!
//! [`FakeHypervisor`] answers the `VBoxManage` subcommands the driver uses
//! with output shaped like the real tool's, and enforces the state rules the
//! driver depends on: `modifyvm` and `unregistervm` refuse running machines,
//! storage cannot change on a running machine, and clones need the prepared
//! snapshot. Every other program and all file transfers go to a
//! [`LocalRunner`].

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::driver::{DEFAULT_BIN_PATH, NOT_READY_MARKER};
use crate::finder::MISSING_VM_MARKER;
use crate::runner::{command_line, CommandOutput, LocalRunner, Runner};
use crate::DriverError;

const ERROR_PREFIX: &str = "VBoxManage: error:";
const SILENT_RECONFIGURE_KEY: &str = "VBoxInternal2/SilentReconfigureWhilePaused";
const DEFAULT_SCSI_SLOTS: u32 = 4;

/// Power state of a fake machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeState {
    PoweredOff,
    Running,
    Paused,
}

impl FakeState {
    fn as_str(self) -> &'static str {
        match self {
            Self::PoweredOff => "poweroff",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

/// Network backend of one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeNic {
    /// `nat`, `natnetwork`, `hostonly` or `null`.
    pub kind: String,
    pub target: Option<String>,
    pub mac: String,
}

/// Snapshot of one registered machine.
#[derive(Debug, Clone)]
pub struct FakeMachine {
    pub uuid: String,
    pub name: String,
    pub state: FakeState,
    pub memory: u32,
    pub cpus: u32,
    pub paravirtprovider: String,
    pub snapshots: Vec<String>,
    /// Medium per `(port, device)`; `none` when empty.
    pub scsi: BTreeMap<(u32, u32), String>,
    pub dvd: String,
    pub nics: BTreeMap<usize, FakeNic>,
    pub extradata: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    machines: Vec<FakeMachine>,
    media: Vec<String>,
    commands: Vec<String>,
    not_ready: BTreeMap<String, u32>,
    failures: BTreeMap<String, VecDeque<String>>,
    scsi_slots: u32,
    mac_counter: u32,
}

/// Scriptable hypervisor for tests.
#[derive(Debug)]
pub struct FakeHypervisor {
    inner: Mutex<Inner>,
    local: LocalRunner,
}

impl Default for FakeHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

type Reply = CommandOutput;

fn ok(output: impl Into<String>) -> Reply {
    CommandOutput::new(0, output)
}

fn fail(message: impl AsRef<str>) -> Reply {
    CommandOutput::new(1, format!("{ERROR_PREFIX} {}\n", message.as_ref()))
}

impl FakeHypervisor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { scsi_slots: DEFAULT_SCSI_SLOTS, ..Inner::default() }),
            local: LocalRunner::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// SCSI slots given to machines registered from now on.
    pub fn set_scsi_slots(&self, slots: u32) {
        self.lock().scsi_slots = slots;
    }

    /// Makes the next `times` calls of `subcommand` fail as not ready.
    pub fn not_ready(&self, subcommand: &str, times: u32) {
        self.lock().not_ready.insert(subcommand.to_owned(), times);
    }

    /// Makes the next call of `subcommand` fail with `message`.
    pub fn fail_next(&self, subcommand: &str, message: &str) {
        self.lock()
            .failures
            .entry(subcommand.to_owned())
            .or_default()
            .push_back(message.to_owned());
    }

    /// Registers a machine directly and returns its UUID.
    pub fn register(&self, name: &str, state: FakeState) -> String {
        let mut inner = self.lock();
        let uuid = Uuid::new_v4().to_string();
        let machine = inner.new_machine(uuid.clone(), name.to_owned(), state);
        inner.machines.push(machine);
        uuid
    }

    /// Machine by UUID or name.
    #[must_use]
    pub fn machine(&self, id: &str) -> Option<FakeMachine> {
        self.lock().find(id).cloned()
    }

    #[must_use]
    pub fn machines(&self) -> Vec<FakeMachine> {
        self.lock().machines.clone()
    }

    /// Disk images created with `createhd`.
    #[must_use]
    pub fn media(&self) -> Vec<String> {
        self.lock().media.clone()
    }

    /// Hypervisor command lines received so far, without the program name.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Received commands whose subcommand is `subcommand`.
    #[must_use]
    pub fn commands_of(&self, subcommand: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.split(' ').next() == Some(subcommand))
            .collect()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    fn handle(&self, args: &[&str]) -> Reply {
        let mut inner = self.lock();
        inner.commands.push(args.join(" "));
        let Some((&sub, rest)) = args.split_first() else {
            return fail("missing subcommand");
        };

        if let Some(left) = inner.not_ready.get_mut(sub) {
            if *left > 0 {
                *left -= 1;
                return CommandOutput::new(1, format!("{NOT_READY_MARKER} (0x80004005)\n"));
            }
        }
        if let Some(message) = inner.failures.get_mut(sub).and_then(VecDeque::pop_front) {
            return fail(message);
        }

        match sub {
            "showvminfo" => inner.show_vm_info(rest),
            "import" => inner.import(rest),
            "list" => inner.list(rest),
            "modifyvm" => inner.modify_vm(rest),
            "snapshot" => inner.snapshot(rest),
            "clonevm" => inner.clone_vm(rest),
            "startvm" => inner.start_vm(rest),
            "controlvm" => inner.control_vm(rest),
            "storageattach" => inner.storage_attach(rest),
            "setextradata" => inner.set_extra_data(rest),
            "unregistervm" => inner.unregister_vm(rest),
            "createhd" => inner.create_hd(rest),
            other => fail(format!("unknown subcommand '{other}'")),
        }
    }
}

fn flag<'a>(args: &[&'a str], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == name)
        .and_then(|i| args.get(i + 1))
        .copied()
}

fn not_found(id: &str) -> Reply {
    fail(format!("{MISSING_VM_MARKER} with UUID or name '{id}'"))
}

fn locked(machine: &FakeMachine) -> Reply {
    fail(format!(
        "The machine '{}' is already locked for a session (or being unlocked)",
        machine.name
    ))
}

impl Inner {
    fn new_machine(&mut self, uuid: String, name: String, state: FakeState) -> FakeMachine {
        let scsi = (0..self.scsi_slots).map(|port| ((port, 0), "none".to_owned())).collect();
        self.mac_counter += 1;
        let nic = FakeNic {
            kind: "nat".to_owned(),
            target: None,
            mac: format!("080027{:06X}", self.mac_counter),
        };
        FakeMachine {
            uuid,
            name,
            state,
            memory: 512,
            cpus: 1,
            paravirtprovider: "default".to_owned(),
            snapshots: Vec::new(),
            scsi,
            dvd: "emptydrive".to_owned(),
            nics: BTreeMap::from([(1, nic)]),
            extradata: BTreeMap::new(),
        }
    }

    fn find(&self, id: &str) -> Option<&FakeMachine> {
        self.machines.iter().find(|m| m.uuid == id || m.name == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut FakeMachine> {
        self.machines.iter_mut().find(|m| m.uuid == id || m.name == id)
    }

    fn show_vm_info(&self, args: &[&str]) -> Reply {
        let Some(&id) = args.first() else {
            return fail("missing machine");
        };
        let Some(m) = self.find(id) else {
            return not_found(id);
        };

        if !args.contains(&"--machinereadable") {
            return ok(format!("Name:            {}\nUUID:            {}\nState:           {}\n", m.name, m.uuid, m.state.as_str()));
        }

        let mut out = format!(
            "name=\"{}\"\nUUID=\"{}\"\nmemory={}\ncpus={}\nVMState=\"{}\"\n",
            m.name,
            m.uuid,
            m.memory,
            m.cpus,
            m.state.as_str()
        );
        out.push_str(&format!("\"IDE Controller-1-0\"=\"{}\"\n", m.dvd));
        for ((port, device), medium) in &m.scsi {
            out.push_str(&format!("\"SCSI Controller-{port}-{device}\"=\"{medium}\"\n"));
        }
        for (index, nic) in &m.nics {
            out.push_str(&format!("nic{index}=\"{}\"\nmacaddress{index}=\"{}\"\n", nic.kind, nic.mac));
        }
        ok(out)
    }

    fn import(&mut self, args: &[&str]) -> Reply {
        let Some(&path) = args.first() else {
            return fail("missing appliance");
        };
        let stem = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("appliance");
        let mut name = stem.to_owned();
        let mut n = 1;
        while self.find(&name).is_some() {
            name = format!("{stem}_{n}");
            n += 1;
        }

        let machine = self.new_machine(Uuid::new_v4().to_string(), name.clone(), FakeState::PoweredOff);
        self.machines.push(machine);
        ok(format!(
            "0%...10%...20%...30%...40%...50%...60%...70%...80%...90%...100%\n\
             Interpreting {path}...\nOK.\nDisks:\n  vmdisk1\t5000 MB\t\n\
             Virtual system 0:\n 0: Suggested OS type: \"Linux26_64\"\n\
             \x20\x20\x20\x20(change with \"--vsys 0 --ostype <type>\")\n\
             \x201: Suggested VM name \"{name}\"\n\
             \x20\x20\x20\x20(change with \"--vsys 0 --vmname <name>\")\n\
             Successfully imported the appliance.\n"
        ))
    }

    fn list(&self, args: &[&str]) -> Reply {
        match args.first() {
            Some(&"vms") => ok(self
                .machines
                .iter()
                .map(|m| format!("\"{}\" {{{}}}\n", m.name, m.uuid))
                .collect::<String>()),
            _ => fail("unsupported list"),
        }
    }

    fn modify_vm(&mut self, args: &[&str]) -> Reply {
        let Some((&id, opts)) = args.split_first() else {
            return fail("missing machine");
        };
        let Some(m) = self.find_mut(id) else {
            return not_found(id);
        };
        if m.state != FakeState::PoweredOff {
            return locked(m);
        }

        let mut i = 0;
        while i < opts.len() {
            let Some(&value) = opts.get(i + 1) else {
                return fail(format!("missing value for '{}'", opts[i]));
            };
            let key = opts[i];
            match key {
                "--name" => m.name = value.to_owned(),
                "--memory" => match value.parse() {
                    Ok(v) => m.memory = v,
                    Err(_) => return fail(format!("invalid memory '{value}'")),
                },
                "--cpus" => match value.parse() {
                    Ok(v) => m.cpus = v,
                    Err(_) => return fail(format!("invalid cpus '{value}'")),
                },
                "--paravirtprovider" => m.paravirtprovider = value.to_owned(),
                _ => {
                    if let Some(nic) = key.strip_prefix("--nic").and_then(|n| n.parse().ok()) {
                        if !["nat", "natnetwork", "hostonly", "null"].contains(&value) {
                            return fail(format!("invalid nic type '{value}'"));
                        }
                        set_nic(m, nic, value, None);
                    } else if let Some(nic) = key
                        .strip_prefix("--natnet")
                        .or_else(|| key.strip_prefix("--hostonlyadapter"))
                        .and_then(|n| n.parse().ok())
                    {
                        if let Some(adapter) = m.nics.get_mut(&nic) {
                            adapter.target = Some(value.to_owned());
                        }
                    } else {
                        return fail(format!("unknown option '{key}'"));
                    }
                }
            }
            i += 2;
        }
        ok("")
    }

    fn snapshot(&mut self, args: &[&str]) -> Reply {
        match args {
            [id, "take", name] => {
                let Some(m) = self.find_mut(id) else {
                    return not_found(id);
                };
                m.snapshots.push((*name).to_owned());
                ok(format!("0%...100%\nSnapshot taken. UUID: {}\n", Uuid::new_v4()))
            }
            _ => fail("unsupported snapshot command"),
        }
    }

    fn clone_vm(&mut self, args: &[&str]) -> Reply {
        let Some(&source) = args.first() else {
            return fail("missing machine");
        };
        let Some(src) = self.find(source).cloned() else {
            return not_found(source);
        };
        if let Some(snapshot) = flag(args, "--snapshot") {
            if !src.snapshots.iter().any(|s| s == snapshot) {
                return fail(format!("Could not find a snapshot named '{snapshot}'"));
            }
        }
        let uuid = flag(args, "--uuid").map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);
        let name = flag(args, "--name").map_or_else(|| format!("{} Clone", src.name), str::to_owned);

        let mut clone = self.new_machine(uuid, name.clone(), FakeState::PoweredOff);
        clone.memory = src.memory;
        clone.cpus = src.cpus;
        clone.paravirtprovider = src.paravirtprovider;
        self.machines.push(clone);
        ok(format!("0%...100%\nMachine has been successfully cloned as \"{name}\"\n"))
    }

    fn start_vm(&mut self, args: &[&str]) -> Reply {
        let Some(&id) = args.first() else {
            return fail("missing machine");
        };
        let Some(m) = self.find_mut(id) else {
            return not_found(id);
        };
        if m.state != FakeState::PoweredOff {
            return fail(format!(
                "The machine '{}' is already locked by a session (or being locked or unlocked)",
                m.name
            ));
        }
        m.state = FakeState::Running;
        ok(format!(
            "Waiting for VM \"{0}\" to power on...\nVM \"{0}\" has been successfully started.\n",
            m.name
        ))
    }

    fn control_vm(&mut self, args: &[&str]) -> Reply {
        let Some((&id, action)) = args.split_first() else {
            return fail("missing machine");
        };
        let Some(m) = self.find_mut(id) else {
            return not_found(id);
        };
        if m.state == FakeState::PoweredOff {
            return fail(format!("Machine '{}' is not currently running", m.name));
        }

        match action {
            ["poweroff"] => m.state = FakeState::PoweredOff,
            ["pause"] if m.state == FakeState::Running => m.state = FakeState::Paused,
            ["resume"] if m.state == FakeState::Paused => m.state = FakeState::Running,
            [nic, kind, target @ ..] if nic.starts_with("nic") => {
                let Some(index) = nic.strip_prefix("nic").and_then(|n| n.parse().ok()) else {
                    return fail(format!("invalid adapter '{nic}'"));
                };
                if !m.nics.contains_key(&index) {
                    return fail(format!("adapter {index} is not present"));
                }
                set_nic(m, index, kind, target.first().copied());
            }
            other => return fail(format!("invalid controlvm request '{}'", other.join(" "))),
        }
        ok("0%...100%\n")
    }

    fn storage_attach(&mut self, args: &[&str]) -> Reply {
        let Some(&id) = args.first() else {
            return fail("missing machine");
        };
        let Some(m) = self.find_mut(id) else {
            return not_found(id);
        };
        match m.state {
            FakeState::Running => {
                return fail("The machine is not mutable (state is Running)");
            }
            FakeState::Paused
                if m.extradata.get(SILENT_RECONFIGURE_KEY).map(String::as_str) != Some("1") =>
            {
                return fail("The machine is not mutable (state is Paused)");
            }
            _ => {}
        }

        let (Some(controller), Some(port), Some(device), Some(medium)) = (
            flag(args, "--storagectl"),
            flag(args, "--port").and_then(|p| p.parse::<u32>().ok()),
            flag(args, "--device").and_then(|d| d.parse::<u32>().ok()),
            flag(args, "--medium"),
        ) else {
            return fail("incomplete storageattach");
        };

        match controller {
            "SCSI Controller" => match m.scsi.get_mut(&(port, device)) {
                Some(slot) => *slot = medium.to_owned(),
                None => return fail(format!("no SCSI slot {port}-{device}")),
            },
            "IDE Controller" if (port, device) == (1, 0) => m.dvd = medium.to_owned(),
            _ => return fail(format!("unknown controller '{controller}'")),
        }
        ok("")
    }

    fn set_extra_data(&mut self, args: &[&str]) -> Reply {
        let [id, key, value] = args else {
            return fail("setextradata takes a machine, key and value");
        };
        let Some(m) = self.find_mut(id) else {
            return not_found(id);
        };
        m.extradata.insert((*key).to_owned(), (*value).to_owned());
        ok("")
    }

    fn unregister_vm(&mut self, args: &[&str]) -> Reply {
        let Some(&id) = args.first() else {
            return fail("missing machine");
        };
        let Some(index) = self.machines.iter().position(|m| m.uuid == id || m.name == id) else {
            return not_found(id);
        };
        if self.machines[index].state != FakeState::PoweredOff {
            return locked(&self.machines[index]);
        }
        self.machines.remove(index);
        ok("0%...100%\n")
    }

    fn create_hd(&mut self, args: &[&str]) -> Reply {
        let (Some(filename), Some(_size)) = (flag(args, "--filename"), flag(args, "--size")) else {
            return fail("createhd needs --filename and --size");
        };
        if self.media.iter().any(|m| m == filename) {
            return fail(format!("Failed to create medium: '{filename}' already exists"));
        }
        self.media.push(filename.to_owned());
        ok(format!("0%...100%\nMedium created. UUID: {}\n", Uuid::new_v4()))
    }
}

fn set_nic(m: &mut FakeMachine, index: usize, kind: &str, target: Option<&str>) {
    if let Some(nic) = m.nics.get_mut(&index) {
        nic.kind = kind.to_owned();
        nic.target = target.map(str::to_owned);
    }
}

#[async_trait]
impl Runner for FakeHypervisor {
    async fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput, DriverError> {
        if program.ends_with(DEFAULT_BIN_PATH) {
            let reply = self.handle(args);
            tracing::trace!(command = %command_line(program, args), exit_code = reply.exit_code, "fake hypervisor");
            return Ok(reply);
        }
        self.local.execute(program, args).await
    }

    async fn upload(&self, src_dir: &Path, dst_dir: &str) -> Result<(), DriverError> {
        self.local.upload(src_dir, dst_dir).await
    }

    async fn put(&self, path: &str, contents: &[u8]) -> Result<(), DriverError> {
        self.local.put(path, contents).await
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, DriverError> {
        self.local.get(path).await
    }
}
