//! Block-storage calls against the compute gateway.

use crate::provider::{
    ProviderFuture, VolumeApi, VolumeHandle, VolumeRecord, VolumeRequest, VolumeState,
};

use super::types::{
    AttachVolumeRequest, CreateVolumeRequest, DetachVolumeRequest, VolumeEnvelope,
    VolumeListEnvelope, WireVolume,
};
use super::{GatewayApiError, GatewayClient, HTTP_CLIENT};

impl GatewayClient {
    async fn create_volume_call(
        &self,
        request: &VolumeRequest,
    ) -> Result<VolumeHandle, GatewayApiError> {
        let url = self.url(&format!("/zones/{}/volumes", request.zone));
        let payload = CreateVolumeRequest {
            name: request.name.clone(),
            snapshot_id: request.snapshot_id.clone(),
            tags: request.tags.clone(),
        };
        let body = self.execute(HTTP_CLIENT.post(&url).json(&payload)).await?;
        let parsed: VolumeEnvelope = Self::decode(&body)?;
        Ok(VolumeHandle {
            id: parsed.volume.id,
            zone: parsed.volume.zone,
        })
    }

    async fn describe_volume_call(
        &self,
        handle: &VolumeHandle,
    ) -> Result<VolumeState, GatewayApiError> {
        let url = self.url(&format!("/zones/{}/volumes/{}", handle.zone, handle.id));
        let body = self.execute(HTTP_CLIENT.get(&url)).await?;
        let parsed: VolumeEnvelope = Self::decode(&body)?;
        Ok(VolumeState::parse(&parsed.volume.state))
    }

    async fn attach_volume_call(
        &self,
        handle: &VolumeHandle,
        instance_id: &str,
        device: &str,
    ) -> Result<(), GatewayApiError> {
        let url = self.url(&format!(
            "/zones/{}/instances/{instance_id}/attach-volume",
            handle.zone
        ));
        let payload = AttachVolumeRequest {
            volume_id: handle.id.clone(),
            device: device.to_owned(),
        };
        self.execute(HTTP_CLIENT.post(&url).json(&payload)).await?;
        Ok(())
    }

    async fn detach_volume_call(
        &self,
        handle: &VolumeHandle,
        instance_id: &str,
    ) -> Result<(), GatewayApiError> {
        let url = self.url(&format!(
            "/zones/{}/instances/{instance_id}/detach-volume",
            handle.zone
        ));
        let payload = DetachVolumeRequest {
            volume_id: handle.id.clone(),
        };
        self.execute(HTTP_CLIENT.post(&url).json(&payload)).await?;
        Ok(())
    }

    async fn delete_volume_call(&self, handle: &VolumeHandle) -> Result<(), GatewayApiError> {
        let url = self.url(&format!("/zones/{}/volumes/{}", handle.zone, handle.id));
        self.execute(HTTP_CLIENT.delete(&url)).await?;
        Ok(())
    }

    async fn list_volumes_call(
        &self,
        zone: &str,
        tag: &str,
    ) -> Result<Vec<VolumeRecord>, GatewayApiError> {
        let url = self.url(&format!("/zones/{zone}/volumes"));
        let body = self
            .execute(HTTP_CLIENT.get(&url).query(&[("tag", tag)]))
            .await?;
        let parsed: VolumeListEnvelope = Self::decode(&body)?;
        Ok(parsed.volumes.into_iter().map(record_from_wire).collect())
    }
}

fn record_from_wire(volume: WireVolume) -> VolumeRecord {
    VolumeRecord {
        id: volume.id,
        zone: volume.zone,
        state: VolumeState::parse(&volume.state),
        tags: volume.tags,
    }
}

impl VolumeApi for GatewayClient {
    type Error = GatewayApiError;

    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeRequest,
    ) -> ProviderFuture<'a, VolumeHandle, Self::Error> {
        Box::pin(async move { self.create_volume_call(request).await })
    }

    fn describe_volume<'a>(
        &'a self,
        handle: &'a VolumeHandle,
    ) -> ProviderFuture<'a, VolumeState, Self::Error> {
        Box::pin(async move { self.describe_volume_call(handle).await })
    }

    fn attach_volume<'a>(
        &'a self,
        handle: &'a VolumeHandle,
        instance_id: &'a str,
        device: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.attach_volume_call(handle, instance_id, device).await })
    }

    fn detach_volume<'a>(
        &'a self,
        handle: &'a VolumeHandle,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.detach_volume_call(handle, instance_id).await })
    }

    fn delete_volume<'a>(
        &'a self,
        handle: &'a VolumeHandle,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.delete_volume_call(handle).await })
    }

    fn list_volumes<'a>(
        &'a self,
        zone: &'a str,
        tag: &'a str,
    ) -> ProviderFuture<'a, Vec<VolumeRecord>, Self::Error> {
        Box::pin(async move { self.list_volumes_call(zone, tag).await })
    }
}
