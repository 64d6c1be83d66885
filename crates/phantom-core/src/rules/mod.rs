//! Call-site rewrite rules
//!
//! A rule matches one API call by owner, name, descriptor and invoke kind and
//! redirects it to a static entry point on the generated bridge class. The
//! rules are plain data: [`catalog`] holds every rule, and the bridge
//! generator reads the same table to emit one entry point per distinct
//! (bridge name, bridge descriptor).

mod catalog;

pub use catalog::{catalog, RuleIndex, RULE_INDEX};

use phantom_classfile::{DescriptorError, FieldType, MethodDescriptor, Opcode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Descriptor of the plugin reference passed to bound entry points
pub const PLUGIN_DESC: &str = "Lorg/bukkit/plugin/Plugin;";

/// Rule groups, selectable through configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleGroup {
    /// Player and world lookups served from the snapshot mirror
    Mirroring,
    /// Server-wide calls
    Server,
    /// Version strings
    Version,
    /// Player calls
    Player,
    /// Entity calls
    Entity,
    /// World calls
    World,
    /// Block and block state calls
    Block,
    /// Scoreboard calls
    Scoreboard,
    /// Inventory calls
    Inventory,
    /// Boss bar calls
    Bossbar,
    /// Chunk calls
    Chunk,
    /// Event dispatch
    Events,
    /// Bukkit scheduler and runnables
    Scheduler,
    /// World creation and generators
    Worldgen,
    /// Bridge init and shutdown in the plugin main class
    Lifecycle,
    /// Cancelled-event guard on event handlers
    EventGuard,
    /// Configured event handlers moved off the region thread
    AsyncHandlers,
}

impl RuleGroup {
    /// Every group, in declaration order
    pub const ALL: [RuleGroup; 17] = [
        RuleGroup::Mirroring,
        RuleGroup::Server,
        RuleGroup::Version,
        RuleGroup::Player,
        RuleGroup::Entity,
        RuleGroup::World,
        RuleGroup::Block,
        RuleGroup::Scoreboard,
        RuleGroup::Inventory,
        RuleGroup::Bossbar,
        RuleGroup::Chunk,
        RuleGroup::Events,
        RuleGroup::Scheduler,
        RuleGroup::Worldgen,
        RuleGroup::Lifecycle,
        RuleGroup::EventGuard,
        RuleGroup::AsyncHandlers,
    ];

    /// Configuration name
    pub fn name(self) -> &'static str {
        match self {
            RuleGroup::Mirroring => "mirroring",
            RuleGroup::Server => "server",
            RuleGroup::Version => "version",
            RuleGroup::Player => "player",
            RuleGroup::Entity => "entity",
            RuleGroup::World => "world",
            RuleGroup::Block => "block",
            RuleGroup::Scoreboard => "scoreboard",
            RuleGroup::Inventory => "inventory",
            RuleGroup::Bossbar => "bossbar",
            RuleGroup::Chunk => "chunk",
            RuleGroup::Events => "events",
            RuleGroup::Scheduler => "scheduler",
            RuleGroup::Worldgen => "worldgen",
            RuleGroup::Lifecycle => "lifecycle",
            RuleGroup::EventGuard => "event-guard",
            RuleGroup::AsyncHandlers => "async-handlers",
        }
    }

    /// Whether the group rewrites individual call sites
    pub fn is_call_site(self) -> bool {
        !matches!(
            self,
            RuleGroup::Lifecycle | RuleGroup::EventGuard | RuleGroup::AsyncHandlers
        )
    }
}

impl fmt::Display for RuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuleGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleGroup::ALL
            .into_iter()
            .find(|g| g.name() == s)
            .ok_or_else(|| format!("Unknown rule group: {}", s))
    }
}

/// A set of enabled rule groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupSet(u32);

impl GroupSet {
    /// Every group
    pub fn all() -> Self {
        RuleGroup::ALL.into_iter().collect()
    }

    /// No group
    pub fn empty() -> Self {
        GroupSet(0)
    }

    /// Every group except `disabled`
    pub fn without<'a>(disabled: impl IntoIterator<Item = &'a RuleGroup>) -> Self {
        let mut set = Self::all();
        for group in disabled {
            set.0 &= !Self::bit(*group);
        }
        set
    }

    fn bit(group: RuleGroup) -> u32 {
        1 << group as u32
    }

    /// Whether `group` is in the set
    pub fn contains(self, group: RuleGroup) -> bool {
        self.0 & Self::bit(group) != 0
    }

    /// Add `group`
    pub fn insert(&mut self, group: RuleGroup) {
        self.0 |= Self::bit(group);
    }
}

impl FromIterator<RuleGroup> for GroupSet {
    fn from_iter<I: IntoIterator<Item = RuleGroup>>(iter: I) -> Self {
        let mut set = GroupSet::empty();
        for group in iter {
            set.insert(group);
        }
        set
    }
}

/// How the original call is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// `invokevirtual`
    Virtual,
    /// `invokeinterface`
    Interface,
    /// `invokestatic`
    Static,
}

impl InvokeKind {
    /// The opcode for this kind
    pub fn opcode(self) -> Opcode {
        match self {
            InvokeKind::Virtual => Opcode::Invokevirtual,
            InvokeKind::Interface => Opcode::Invokeinterface,
            InvokeKind::Static => Opcode::Invokestatic,
        }
    }

    /// The kind of an invoke opcode, `None` for special and dynamic calls
    pub fn from_opcode(opcode: Opcode) -> Option<Self> {
        match opcode {
            Opcode::Invokevirtual => Some(InvokeKind::Virtual),
            Opcode::Invokeinterface => Some(InvokeKind::Interface),
            Opcode::Invokestatic => Some(InvokeKind::Static),
            _ => None,
        }
    }

    /// Whether the call pops a receiver
    pub fn has_receiver(self) -> bool {
        self != InvokeKind::Static
    }
}

/// What the entry point needs from the calling class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Nothing
    None,
    /// The owning plugin, pushed first
    Plugin,
}

/// Whether the receiver is forwarded to the entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// Passed as the first kept operand
    Keep,
    /// Popped and discarded
    Drop,
}

/// A constant appended after the kept operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trailing {
    /// `aconst_null` of the given reference descriptor
    Null(&'static str),
}

impl Trailing {
    /// Descriptor of the pushed value
    pub fn descriptor(self) -> &'static str {
        match self {
            Trailing::Null(desc) => desc,
        }
    }
}

/// An operand of the original call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// The receiver
    Receiver,
    /// The n-th declared argument
    Arg(u8),
}

/// Where a thunk runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// The global region
    Global,
    /// The region or entity owning this operand (entity, location, block,
    /// block state, chunk or inventory)
    Of(Operand),
    /// The region owning a column given as `(world, x, z)` operands, in chunk
    /// coordinates when `chunk` is set
    Column {
        /// World operand
        world: Operand,
        /// X operand
        x: Operand,
        /// Z operand
        z: Operand,
        /// Coordinates are chunk coordinates
        chunk: bool,
    },
}

/// Snapshot reads served from the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Snapshot {
    /// Online players collection
    OnlinePlayers,
    /// Loaded worlds list
    Worlds,
    /// Player by case-insensitive name
    PlayerByName,
    /// Player by UUID
    PlayerByUuid,
    /// World by name
    WorldByName,
    /// World by UUID
    WorldByUuid,
}

/// Cached server constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    /// `Bukkit.getVersion()`
    ServerVersion,
    /// `Bukkit.getBukkitVersion()`
    BukkitVersion,
}

impl Constant {
    /// Bridge field holding the value
    pub fn field(self) -> &'static str {
        match self {
            Constant::ServerVersion => "CACHED_SERVER_VERSION",
            Constant::BukkitVersion => "CACHED_BUKKIT_VERSION",
        }
    }
}

/// Delay and repetition of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Next tick
    Now,
    /// One `long` delay argument
    Later,
    /// `long` delay and `long` period arguments
    Timer,
}

/// A scheduling request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Runs off the region threads
    pub async_: bool,
    /// Delay and repetition
    pub timing: Timing,
    /// Returns the legacy integer id instead of a task handle
    pub returns_id: bool,
}

/// Entry point behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read from the snapshot mirror
    Snapshot(Snapshot),
    /// Run on the tier, inline when already there; never waits
    Post(Affinity),
    /// Run on the tier and wait for the result, bounded by the API timeout
    Fetch(Affinity),
    /// `getstatic` of a cached constant instead of a call
    Constant(Constant),
    /// Schedule a runnable through the region schedulers
    Schedule(Schedule),
    /// `BukkitScheduler.cancelTask(int)`
    CancelTask,
    /// `BukkitScheduler.cancelTasks(Plugin)`
    CancelTasks,
    /// `BukkitRunnable.cancel()`
    RunnableCancel,
    /// `BukkitRunnable.getTaskId()`
    RunnableTaskId,
    /// Wrap the plugin's default generator for parallel generation
    WrapGenerator,
    /// Create a world on the dedicated worker
    CreateWorld,
    /// Dispatch an event on the global region
    CallEvent,
}

impl Action {
    /// Whether the entry point packs its operands into a `$Call` thunk
    pub fn uses_thunk(self) -> bool {
        matches!(
            self,
            Action::Post(_) | Action::Fetch(_) | Action::CreateWorld | Action::CallEvent
        )
    }
}

/// A declarative call-site rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSiteRule {
    /// Group the rule belongs to
    pub group: RuleGroup,
    /// Owner class of the original call
    pub owner: &'static str,
    /// Method name
    pub name: &'static str,
    /// Method descriptor
    pub desc: &'static str,
    /// Invoke kind
    pub kind: InvokeKind,
    /// Entry point name on the bridge class
    pub bridge_name: &'static str,
    /// Binding requirement
    pub binding: Binding,
    /// Receiver policy
    pub receiver: Receiver,
    /// Constants pushed after the kept operands
    pub trailing: &'static [Trailing],
    /// Entry point behaviour
    pub action: Action,
}

impl CallSiteRule {
    /// The original descriptor, parsed
    pub fn original(&self) -> Result<MethodDescriptor, DescriptorError> {
        MethodDescriptor::parse(self.desc)
    }

    /// Stack operand types of the original call, receiver first
    pub fn operand_types(&self) -> Result<Vec<FieldType>, DescriptorError> {
        let desc = self.original()?;
        let mut types = Vec::with_capacity(desc.params.len() + 1);
        if self.kind.has_receiver() {
            types.push(FieldType::Object(self.owner.to_string()));
        }
        types.extend(desc.params);
        Ok(types)
    }

    /// Operand types forwarded to the entry point, receiver first if kept
    pub fn kept_types(&self) -> Result<Vec<FieldType>, DescriptorError> {
        let mut types = self.operand_types()?;
        if self.kind.has_receiver() && self.receiver == Receiver::Drop {
            types.remove(0);
        }
        Ok(types)
    }

    /// Position of `operand` among the kept operands
    pub fn kept_position(&self, operand: Operand) -> Option<usize> {
        let keeps_receiver = self.kind.has_receiver() && self.receiver == Receiver::Keep;
        match operand {
            Operand::Receiver => keeps_receiver.then_some(0),
            Operand::Arg(n) => Some(n as usize + usize::from(keeps_receiver)),
        }
    }

    /// Bridge descriptor: plugin, kept operands, trailing constants, then
    /// the original return type
    pub fn bridge_desc(&self) -> Result<String, DescriptorError> {
        let mut out = String::from("(");
        if self.binding == Binding::Plugin {
            out.push_str(PLUGIN_DESC);
        }
        for ty in self.kept_types()? {
            out.push_str(&ty.to_string());
        }
        for trailing in self.trailing {
            out.push_str(trailing.descriptor());
        }
        out.push(')');
        out.push_str(&self.original()?.return_descriptor());
        Ok(out)
    }

    /// Whether the rewrite can replace the call instruction in place
    pub fn is_plain_replacement(&self) -> bool {
        self.binding == Binding::None
            && (!self.kind.has_receiver() || self.receiver == Receiver::Keep)
            && self.trailing.is_empty()
            && !matches!(self.action, Action::Constant(_))
    }
}
