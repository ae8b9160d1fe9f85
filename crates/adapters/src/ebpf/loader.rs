use aya::{
    Ebpf,
    programs::{SchedClassifier, TcAttachType, tc},
};
use tracing::{info, warn};

/// Loads the tc-ipsec object and attaches its classifiers.
///
/// Wraps the `aya::Ebpf` instance. Dropping the loader detaches every
/// program it attached.
pub struct EbpfLoader {
    ebpf: Ebpf,
}

impl EbpfLoader {
    /// Load an eBPF object from raw ELF bytes.
    ///
    /// Initializes aya-log for drop diagnostics emitted by the kernel side
    /// (best-effort). Returns an error if the verifier rejects the object.
    pub fn load(program_bytes: &[u8]) -> Result<Self, anyhow::Error> {
        let mut ebpf = Ebpf::load(program_bytes)?;

        if let Err(e) = aya_log::EbpfLogger::init(&mut ebpf) {
            warn!("eBPF logger init failed (non-fatal): {e}");
        }

        info!("eBPF object loaded");
        Ok(Self { ebpf })
    }

    /// Attach a TC classifier to `interface` on the given hook.
    ///
    /// Adds a `clsact` qdisc first (best-effort, may already exist). The
    /// program is loaded into the kernel on first use and reused for
    /// later interfaces.
    pub fn attach_tc_program(
        &mut self,
        program_name: &str,
        interface: &str,
        attach_type: TcAttachType,
    ) -> Result<(), anyhow::Error> {
        if let Err(e) = tc::qdisc_add_clsact(interface) {
            warn!(interface, error = %e, "qdisc_add_clsact failed (may already exist)");
        }

        let program: &mut SchedClassifier = self
            .ebpf
            .program_mut(program_name)
            .ok_or_else(|| anyhow::anyhow!("program '{program_name}' not found in eBPF object"))?
            .try_into()?;

        if program.fd().is_err() {
            program.load()?;
        }
        program.attach(interface, attach_type)?;
        info!(
            program_name,
            interface,
            hook = hook_name(attach_type),
            "TC program attached"
        );
        Ok(())
    }

    /// Borrow the inner `Ebpf` instance mutably.
    ///
    /// Used by the map manager and readers to take their maps.
    pub fn ebpf_mut(&mut self) -> &mut Ebpf {
        &mut self.ebpf
    }
}

fn hook_name(attach_type: TcAttachType) -> &'static str {
    match attach_type {
        TcAttachType::Ingress => "ingress",
        TcAttachType::Egress => "egress",
        TcAttachType::Custom(_) => "custom",
    }
}
