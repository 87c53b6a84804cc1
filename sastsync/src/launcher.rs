use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::config::{BranchConfig, ScanType};
use crate::context::ExecutionContext;
use crate::error::SyncError;
use crate::naming::{self, NamingInputs};
use crate::service::ScanService;
use crate::upload;

/// Start a scan for `config`: name it, pick its sandbox, create the build,
/// upload the file set and trigger the scan with automatic module
/// selection. Names and the file set are settled before anything is
/// changed remotely. The context is updated as each step lands, so a
/// failure leaves whatever progress was made visible.
#[instrument(skip_all, fields(branch = %ctx.branch, app_id = %config.app_id, scan_type = %config.scan_type))]
pub async fn start(
    service: &dyn ScanService,
    config: &BranchConfig,
    inputs: &NamingInputs,
    work_dir: &Path,
    ctx: &mut ExecutionContext,
) -> Result<()> {
    let sandbox_name = match config.scan_type {
        ScanType::Sandbox => Some(naming::sandbox_name(config, inputs)?),
        ScanType::Policy | ScanType::Pipeline => None,
    };
    let scan_name = naming::scan_name(config, inputs)?;

    let files = upload::collect_files(
        work_dir,
        &config.upload_include_patterns,
        &config.upload_exclude_patterns,
    )?;
    if files.is_empty() {
        return Err(SyncError::NothingToUpload.into());
    }

    let sandbox_id = match config.scan_type {
        ScanType::Policy => None,
        ScanType::Pipeline => config.sandbox_id.clone(),
        ScanType::Sandbox => {
            let name = sandbox_name.unwrap_or_default();
            Some(find_or_create_sandbox(service, &config.app_id, &name).await?)
        }
    };
    ctx.sandbox_id = sandbox_id.clone();
    ctx.scan_name = Some(scan_name.clone());

    let build_id = service
        .create_build(&config.app_id, sandbox_id.as_deref(), &scan_name)
        .await
        .with_context(|| format!("failed to create build '{scan_name}'"))?
        .ok_or_else(|| SyncError::BuildCreateFailed {
            scan_name: scan_name.clone(),
        })?;
    info!(build_id = %build_id, scan_name = %scan_name, "build created");
    ctx.build_id = Some(build_id);

    for file in &files {
        let absolute = work_dir.join(file);
        service
            .upload_file(&config.app_id, sandbox_id.as_deref(), &absolute)
            .await
            .map_err(|e| SyncError::UploadFailed {
                file: file.display().to_string(),
                reason: format!("{e:#}"),
            })?;
        info!(file = %file.display(), "uploaded");
    }

    service
        .begin_prescan(&config.app_id, sandbox_id.as_deref(), true)
        .await
        .context("failed to begin pre-scan")?;
    info!(files = files.len(), "scan started");
    Ok(())
}

async fn find_or_create_sandbox(service: &dyn ScanService, app_id: &str, name: &str) -> Result<String> {
    if let Some(id) = service
        .find_sandbox(app_id, name)
        .await
        .with_context(|| format!("failed to look up sandbox '{name}'"))?
    {
        info!(sandbox = name, sandbox_id = %id, "using existing sandbox");
        return Ok(id);
    }

    let created = service.create_sandbox(app_id, name).await.map_err(|e| {
        e.context(SyncError::SandboxCreateFailed {
            name: name.to_string(),
        })
    })?;
    let id = created.ok_or_else(|| SyncError::SandboxCreateFailed {
        name: name.to_string(),
    })?;
    info!(sandbox = name, sandbox_id = %id, "created sandbox");
    Ok(id)
}
