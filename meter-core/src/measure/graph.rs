//! Parent/child measure graph
//!
//! A registry scoped to one hosting context owns every measure. A measure
//! created without a `Parent` option is promoted to parent and brings up a
//! capture pipeline; a measure naming a parent resolves it exactly once at
//! creation, by name and scope, and thereafter only reads. Resolution is
//! never retried: a child that failed to resolve stays inert for its whole
//! lifetime.

use crate::audio::scheduler::DataReadyFn;

use super::options::{OptionReader, ParentConfig, Selector};
use super::pipeline::Pipeline;

/// Opaque hosting-context scope (for instance one skin or document); parents
/// are only visible to children of the same scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u64);

/// Handle to a registered measure. Slots are never reused, so a stale
/// handle (or a child whose parent was removed) reads as inert rather than
/// aliasing a newer measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureId(usize);

enum Role {
    Parent(Pipeline),
    /// Resolved slot index of the parent, or `None` when resolution failed.
    Child(Option<usize>),
}

struct Measure {
    name: String,
    scope: ScopeId,
    selector: Selector,
    role: Role,
}

/// All measures of one hosting context.
#[derive(Default)]
pub struct MeasureRegistry {
    slots: Vec<Option<Measure>>,
}

impl MeasureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a measure. With a `Parent` option the node becomes a child
    /// of the named parent (same scope, matched case-insensitively);
    /// otherwise it is promoted to parent and its capture pipeline is
    /// brought up. `on_data_ready` is invoked from the relay thread each
    /// time the device has frames waiting; hosts typically schedule a poll
    /// from it.
    ///
    /// Call [`reload`](Self::reload) afterwards to parse the projection
    /// options before the first poll.
    pub fn create(
        &mut self,
        name: &str,
        scope: ScopeId,
        options: &dyn OptionReader,
        on_data_ready: DataReadyFn,
    ) -> MeasureId {
        let parent_name = options.read_string("Parent").unwrap_or_default();

        let mut selector = Selector::default();
        let role = if parent_name.is_empty() {
            let cfg = ParentConfig::from_reader(options);
            selector.channel = cfg.channel;
            Role::Parent(Pipeline::new(cfg, on_data_ready))
        } else {
            match self.find_parent(&parent_name, scope) {
                Some(index) => Role::Child(Some(index)),
                None => {
                    log::error!("couldn't find parent measure '{parent_name}'");
                    Role::Child(None)
                }
            }
        };

        self.slots.push(Some(Measure {
            name: name.to_owned(),
            scope,
            selector,
            role,
        }));
        MeasureId(self.slots.len() - 1)
    }

    /// Re-parse a measure's projection options, clamping indices against
    /// the resolved parent's configuration. Parents additionally re-read
    /// their envelope, gain and sensitivity settings and recompute filter
    /// constants.
    pub fn reload(&mut self, id: MeasureId, options: &dyn OptionReader) {
        let parent_index = match self.slots.get(id.0).and_then(Option::as_ref) {
            Some(measure) => match &measure.role {
                Role::Parent(_) => Some(id.0),
                Role::Child(resolved) => *resolved,
            },
            None => return,
        };

        let (half_bins, n_bands) = parent_index
            .and_then(|i| self.slots.get(i).and_then(Option::as_ref))
            .and_then(|m| match &m.role {
                Role::Parent(p) => Some((p.cfg.fft_buffer_size / 2, p.cfg.n_bands)),
                Role::Child(_) => None,
            })
            .unwrap_or((0, 0));

        let Some(measure) = self.slots.get_mut(id.0).and_then(Option::as_mut) else {
            return;
        };
        measure.selector.update_from(options, half_bins, n_bands);

        if let Role::Parent(pipeline) = &mut measure.role {
            // a parent's channel selection also drives the spectral ring
            pipeline.cfg.channel = measure.selector.channel;
            let fft_size = pipeline.cfg.fft_size;
            pipeline.tuning.update_from(options, fft_size);
            pipeline.apply_tuning();
        }
    }

    /// Poll a measure: a parent drains its device and recomputes first, a
    /// child reads straight from its resolved parent's state. Unresolved
    /// children and stale handles read 0.
    pub fn poll(&mut self, id: MeasureId) -> f64 {
        let (selector, parent_index, is_parent) =
            match self.slots.get(id.0).and_then(Option::as_ref) {
                Some(measure) => match &measure.role {
                    Role::Parent(_) => (measure.selector, id.0, true),
                    Role::Child(Some(index)) => (measure.selector, *index, false),
                    Role::Child(None) => return 0.0,
                },
                None => return 0.0,
            };

        let Some(parent) = self.slots.get_mut(parent_index).and_then(Option::as_mut) else {
            return 0.0;
        };
        let Role::Parent(pipeline) = &mut parent.role else {
            return 0.0;
        };

        if is_parent {
            pipeline.poll();
        }
        pipeline.value(&selector)
    }

    /// String read for string-typed outputs; numeric types return `None`
    /// so the host falls back to the numeric value.
    pub fn string_value(&self, id: MeasureId) -> Option<String> {
        let measure = self.slots.get(id.0).and_then(Option::as_ref)?;
        let parent_index = match &measure.role {
            Role::Parent(_) => id.0,
            Role::Child(Some(index)) => *index,
            Role::Child(None) => {
                // inert children still answer string reads, with nothing
                return measure.selector.kind.is_string().then(String::new);
            }
        };

        let parent = self.slots.get(parent_index).and_then(Option::as_ref)?;
        match &parent.role {
            Role::Parent(pipeline) => pipeline.string_value(&measure.selector),
            Role::Child(_) => None,
        }
    }

    /// Remove a measure. Removing a parent tears its pipeline down (the
    /// relay thread is joined before buffers are released) and leaves any
    /// children permanently inert; removing a child never affects the
    /// parent.
    pub fn remove(&mut self, id: MeasureId) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            *slot = None;
        }
    }

    fn find_parent(&self, name: &str, scope: ScopeId) -> Option<usize> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            let measure = slot.as_ref()?;
            (matches!(measure.role, Role::Parent(_))
                && measure.scope == scope
                && measure.name.eq_ignore_ascii_case(name))
            .then_some(index)
        })
    }
}
