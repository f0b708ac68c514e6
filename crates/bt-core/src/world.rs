use core::fmt::Debug;

/// Identifier of the entity that owns a tree component.
///
/// The stable id seeds the per-agent random stream and shows up in logs, so
/// it must not depend on allocation order.
pub trait AgentId: Copy + Ord + Eq + Debug {
    fn stable_id(self) -> u64;
}

macro_rules! impl_agent_id {
    ($($ty:ty),*) => {
        $(
            impl AgentId for $ty {
                fn stable_id(self) -> u64 {
                    self as u64
                }
            }
        )*
    };
}

impl_agent_id!(u16, u32, u64, usize);

/// Read side of the host simulation. Decorators only ever see this.
///
/// The engine does not prescribe queries; hosts add their own methods on the
/// concrete world type.
pub trait WorldView {
    type Agent: AgentId;
}

/// Write side of the host simulation, handed to tasks and services.
pub trait WorldMut: WorldView {}
