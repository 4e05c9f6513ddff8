//! Program negotiation.
//!
//! Picks, from the programs the server advertises in its DUMP reply, the
//! data-path program this client can speak. Matching is on the exact
//! (program number, version) pair.

use crate::error::{ClientError, Result};
use crate::program::{ProgDetail, RpcProgram};

/// Programs chosen for a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiatedPrograms {
    /// Data-path program. Always set after a successful negotiation.
    pub fops: Option<RpcProgram>,
    /// Management program, when the client carries one and the server offers it.
    pub mgmt: Option<RpcProgram>,
}

impl NegotiatedPrograms {
    pub fn is_empty(&self) -> bool {
        self.fops.is_none() && self.mgmt.is_none()
    }
}

/// Matches advertised programs against locally compiled-in descriptors.
#[derive(Debug, Clone)]
pub struct ProgramNegotiator {
    fops: Vec<RpcProgram>,
    mgmt: Vec<RpcProgram>,
}

impl ProgramNegotiator {
    /// `fops` and `mgmt` are in order of preference.
    pub fn new(fops: Vec<RpcProgram>, mgmt: Vec<RpcProgram>) -> Self {
        Self { fops, mgmt }
    }

    /// Selects the programs to use.
    ///
    /// Fails with [`ClientError::NegotiationFailed`] when no advertised entry
    /// matches a data-path descriptor. A management match is optional.
    pub fn select(&self, advertised: &[ProgDetail]) -> Result<NegotiatedPrograms> {
        let mut chosen = NegotiatedPrograms::default();

        for detail in advertised {
            let mut matched = false;

            if chosen.fops.is_none() {
                if let Some(prog) = self.fops.iter().find(|p| p.matches(detail)) {
                    tracing::info!(
                        "Using Program {}, Num ({}), Version ({})",
                        detail.name,
                        detail.prognum,
                        detail.progver
                    );
                    chosen.fops = Some(prog.clone());
                    matched = true;
                }
            }

            if !matched && chosen.mgmt.is_none() {
                if let Some(prog) = self.mgmt.iter().find(|p| p.matches(detail)) {
                    tracing::info!(
                        "Using management program {}, Num ({}), Version ({})",
                        detail.name,
                        detail.prognum,
                        detail.progver
                    );
                    chosen.mgmt = Some(prog.clone());
                    matched = true;
                }
            }

            if !matched {
                tracing::trace!("{} ({}) not supported", detail.name, detail.progver);
            }
        }

        if chosen.fops.is_none() {
            return Err(ClientError::NegotiationFailed);
        }
        Ok(chosen)
    }
}

impl Default for ProgramNegotiator {
    fn default() -> Self {
        Self::new(vec![RpcProgram::fops()], Vec::new())
    }
}
