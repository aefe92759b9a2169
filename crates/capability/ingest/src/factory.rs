//! 采集器工厂：`SourceType` → 构造函数

use crate::api::ApiCollector;
use crate::collector::Collector;
use crate::error::CollectorError;
use crate::modbus::ModbusCollector;
use crate::mqtt::MqttCollector;
use crate::serial::SerialCollector;
use domain::SourceType;
use std::collections::HashMap;
use std::sync::Arc;

pub type CollectorConstructor = Arc<dyn Fn() -> Arc<dyn Collector> + Send + Sync>;

/// 采集器工厂
#[derive(Clone, Default)]
pub struct CollectorFactory {
    constructors: HashMap<SourceType, CollectorConstructor>,
}

impl CollectorFactory {
    /// 空工厂（测试中按需注册）。
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置数据源。
    pub fn with_defaults() -> Self {
        Self::new()
            .register(SourceType::ModbusTcp, || Arc::new(ModbusCollector::new()))
            .register(SourceType::Mqtt, || Arc::new(MqttCollector::new()))
            .register(SourceType::Serial, || Arc::new(SerialCollector::new()))
            .register(SourceType::Api, || Arc::new(ApiCollector::new()))
    }

    pub fn register<F>(mut self, source_type: SourceType, constructor: F) -> Self
    where
        F: Fn() -> Arc<dyn Collector> + Send + Sync + 'static,
    {
        self.constructors.insert(source_type, Arc::new(constructor));
        self
    }

    pub fn supports(&self, source_type: SourceType) -> bool {
        self.constructors.contains_key(&source_type)
    }

    pub fn create(&self, source_type: SourceType) -> Result<Arc<dyn Collector>, CollectorError> {
        self.constructors
            .get(&source_type)
            .map(|constructor| constructor())
            .ok_or(CollectorError::UnsupportedSourceType(source_type))
    }
}
