use super::RegionEquations;

/// Vacuum carries no unknowns; every operation is the trait's no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct VacuumPhysics;

impl RegionEquations for VacuumPhysics {}
