// SPDX-FileCopyrightText: 2025-2026 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Fabrics instance management.

use mxl::MxlInstance;

use crate::error::Result;
use crate::initiator::Initiator;
use crate::target::Target;

/// Entry point for the fabrics layer, bound to an MXL instance.
///
/// Targets and initiators created here replicate grains between the bound
/// instance's flows and remote peers. The instance handle is cheap to clone;
/// the fabrics instance keeps one so flow-backed regions and the domain stay
/// reachable for the lifetime of the endpoints.
///
/// # Examples
///
/// ```no_run
/// # fn example() -> Result<(), mxl_fabrics::Error> {
/// let instance = mxl::MxlInstance::new("/dev/shm/my_domain", "")?;
/// let fabrics = mxl_fabrics::FabricsInstance::new(&instance)?;
/// let target = fabrics.create_target();
/// let initiator = fabrics.create_initiator();
/// # Ok(())
/// # }
/// ```
pub struct FabricsInstance {
    instance: MxlInstance,
}

impl FabricsInstance {
    /// Binds a fabrics instance to an MXL instance.
    pub fn new(instance: &MxlInstance) -> Result<Self> {
        Ok(Self {
            instance: instance.clone(),
        })
    }

    /// The bound MXL instance.
    pub fn mxl_instance(&self) -> &MxlInstance {
        &self.instance
    }

    /// Creates a target in the `Created` state; configure it with
    /// [`Target::setup`].
    pub fn create_target(&self) -> Target {
        Target::new()
    }

    /// Creates an initiator; configure it with
    /// [`crate::Initiator::setup`].
    pub fn create_initiator(&self) -> Initiator {
        Initiator::new()
    }
}
