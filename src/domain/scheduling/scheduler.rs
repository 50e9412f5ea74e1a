use std::sync::Arc;

use chrono::Weekday;
use tracing::{debug, info};

use crate::domain::{
    core::{AvailabilityWindow, Service, ServiceId, ServiceRepository, ServiceSpec, UserId},
    IdGenerator,
};

use super::SchedulingError;

/// サービスと週間スケジュールの管理
pub struct AvailabilityScheduler {
    services: Arc<dyn ServiceRepository>,
    ids: Arc<IdGenerator>,
}

impl AvailabilityScheduler {
    pub fn new(services: Arc<dyn ServiceRepository>, ids: Arc<IdGenerator>) -> Self {
        Self { services, ids }
    }

    /// サービスを作成する (予約受付中、受付時間帯なし)
    pub async fn create_service(
        &self,
        provider_id: UserId,
        spec: ServiceSpec,
    ) -> Result<Service, SchedulingError> {
        let id = self.ids.generate::<ServiceId>().await;
        let mut service = Service::create(id, provider_id, spec)?;
        self.services.save(&mut service).await?;
        info!(service_id = %id, %provider_id, "service created");
        Ok(service)
    }

    pub async fn update_service(
        &self,
        service_id: ServiceId,
        spec: ServiceSpec,
    ) -> Result<Service, SchedulingError> {
        let mut service = self.get_service(service_id).await?;
        service.update(spec)?;
        self.services.save(&mut service).await?;
        info!(%service_id, "service updated");
        Ok(service)
    }

    /// 予約受付の停止・再開 (既存の予約はそのまま)
    pub async fn set_service_active(
        &self,
        service_id: ServiceId,
        active: bool,
    ) -> Result<Service, SchedulingError> {
        let mut service = self.get_service(service_id).await?;
        match active {
            true => service.activate(),
            false => service.deactivate(),
        }
        if self.services.save(&mut service).await? {
            info!(%service_id, active, "service availability toggled");
        }
        Ok(service)
    }

    /// 週間スケジュールを丸ごと置き換える
    ///
    /// 一つでも不正な時間帯があれば何も変更しない。
    pub async fn set_availability(
        &self,
        service_id: ServiceId,
        windows: Vec<AvailabilityWindow>,
    ) -> Result<Service, SchedulingError> {
        let mut service = self.get_service(service_id).await?;
        service.replace_availability(windows)?;
        self.services.save(&mut service).await?;
        info!(
            %service_id,
            windows = service.availability().len(),
            "availability replaced"
        );
        Ok(service)
    }

    pub async fn get_windows(
        &self,
        service_id: ServiceId,
        weekday: Weekday,
    ) -> Result<Vec<AvailabilityWindow>, SchedulingError> {
        let service = self.get_service(service_id).await?;
        Ok(service.windows_on(weekday).into_iter().cloned().collect())
    }

    pub async fn get_service(&self, service_id: ServiceId) -> Result<Service, SchedulingError> {
        self.services
            .find_by_id(service_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found::<Service>(service_id))
    }

    pub async fn list_services(
        &self,
        provider_id: UserId,
    ) -> Result<Vec<Service>, SchedulingError> {
        let services = self.services.find_by_provider(provider_id).await?;
        debug!(%provider_id, "{} services found", services.len());
        Ok(services)
    }
}
