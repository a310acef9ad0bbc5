pub mod organization_service;
pub mod traffic_report_service;
