use serde_json::Value;
use vbox_core::{AgentEnv, NetworkOption, StemcellId, VmId};
use vbox_driver::{Vm, VmProps};

use super::{ActionContext, VM_ID_ARTIFACT};
use crate::CpiError;

/// Clones a machine from a stemcell and hands it its agent environment.
///
/// Any failure after the clone exists deletes the clone and its registry
/// entry before the error is returned.
#[derive(Debug)]
pub struct CreateVm<'a> {
    ctx: &'a ActionContext,
    agent_id: &'a str,
    stemcell_id: &'a StemcellId,
    props: VmProps,
    networks: Vec<NetworkOption>,
    env: Value,
}

impl<'a> CreateVm<'a> {
    /// # Errors
    /// Returns [`CpiError::Core`] if `networks` is malformed.
    pub fn new(
        ctx: &'a ActionContext,
        agent_id: &'a str,
        stemcell_id: &'a StemcellId,
        props: VmProps,
        networks: &Value,
        env: Value,
    ) -> Result<Self, CpiError> {
        Ok(Self {
            ctx,
            agent_id,
            stemcell_id,
            props,
            networks: NetworkOption::parse_all(networks)?,
            env,
        })
    }

    /// # Errors
    /// Returns [`CpiError::NotFound`] for an unknown stemcell, or the error of
    /// the first failing step.
    pub async fn run(mut self) -> Result<VmId, CpiError> {
        self.check_stemcell().await?;
        let vm = self.clone_vm().await?;

        match self.shape_vm(&vm).await {
            Ok(()) => Ok(vm.id().clone()),
            Err(e) => {
                self.clean_up_partial_vm(&vm).await;
                Err(e)
            }
        }
    }

    async fn shape_vm(&mut self, vm: &Vm) -> Result<(), CpiError> {
        self.set_name(vm).await?;
        self.set_props(vm).await?;
        self.configure_network(vm).await?;
        let agent_env = self.build_agent_env(vm).await?;
        self.ctx.vms.register(vm.id()).await?;
        self.ctx.deliver_agent_env(vm, &agent_env).await
    }

    async fn check_stemcell(&self) -> Result<(), CpiError> {
        tracing::info!(stemcell_id = %self.stemcell_id, "checking stemcell");
        if !self.ctx.stemcells.exists(self.stemcell_id).await? {
            return Err(CpiError::not_found("stemcell", self.stemcell_id));
        }
        Ok(())
    }

    async fn clone_vm(&self) -> Result<Vm, CpiError> {
        tracing::info!(stemcell_id = %self.stemcell_id, "cloning vm from stemcell vm");
        let contents = self.ctx.stemcells.get_artifact(self.stemcell_id, VM_ID_ARTIFACT).await?;
        let template_id = VmId::new(String::from_utf8_lossy(&contents).trim());
        let template = self.ctx.driver.vm_finder().find(&template_id).await?;
        Ok(self.ctx.driver.vm_cloner().clone_vm(&template).await?)
    }

    async fn set_name(&self, vm: &Vm) -> Result<(), CpiError> {
        tracing::info!(vm_id = %vm.id(), "setting name");
        vm.set_name(&format!("vm-{}", vm.id())).await?;
        Ok(())
    }

    async fn set_props(&self, vm: &Vm) -> Result<(), CpiError> {
        tracing::info!(vm_id = %vm.id(), memory = self.props.memory, cpus = self.props.cpus, "setting props");
        vm.set_props(&self.props).await?;
        Ok(())
    }

    async fn configure_network(&self, vm: &Vm) -> Result<(), CpiError> {
        tracing::info!(vm_id = %vm.id(), networks = self.networks.len(), "configuring network");
        self.ctx.driver.network_configurer(vm).configure(&self.networks).await?;
        Ok(())
    }

    async fn build_agent_env(&mut self, vm: &Vm) -> Result<AgentEnv, CpiError> {
        tracing::info!(vm_id = %vm.id(), "building agent env");
        self.ctx.driver.network_configurer(vm).add_macs(&mut self.networks).await?;

        let mut env = AgentEnv::new();
        env.vm_id = Some(vm.id().clone());
        env.name = Some(vm.id().to_string());
        env.agent_id = Some(self.agent_id.to_owned());
        env.env = self.env.clone();
        env.agent_options = self.ctx.agent_options.clone();
        env.add_networks(&self.networks)?;
        env.add_empty_disks();
        Ok(env)
    }

    async fn clean_up_partial_vm(&self, vm: &Vm) {
        tracing::warn!(vm_id = %vm.id(), "cleaning up partially created vm");
        if let Err(e) = vm.delete().await {
            tracing::warn!(vm_id = %vm.id(), error = %e, "failed to delete partial vm");
        }
        if let Err(e) = self.ctx.vms.delete(vm.id()).await {
            tracing::warn!(vm_id = %vm.id(), error = %e, "failed to delete partial vm entry");
        }
    }
}
