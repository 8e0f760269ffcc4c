//! ESP-IDF WiFi link driver.
//!
//! Wraps the non-blocking `EspWifi` driver so association proceeds in the
//! background while the run loop keeps servicing commands. Static
//! addressing from the settings is applied by swapping in a fixed-IP
//! station netif before association starts.

use std::net::Ipv4Addr;

use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::ipv4::{
    ClientConfiguration as IpClientConfiguration, ClientSettings, Configuration as IpConfiguration,
    Mask, Subnet,
};
use esp_idf_svc::netif::{EspNetif, NetifConfiguration};
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};
use esp_idf_sys::EspError;
use log::debug;

use super::{NetError, WifiLink};
use crate::settings::Settings;

/// WiFi link over the ESP-IDF driver.
pub struct EspWifiLink<'a> {
    wifi: EspWifi<'a>,
    started: bool,
}

impl<'a> EspWifiLink<'a> {
    pub fn new(modem: Modem, sysloop: EspSystemEventLoop) -> Result<Self, EspError> {
        let wifi = EspWifi::new(modem, sysloop, None)?;
        Ok(Self {
            wifi,
            started: false,
        })
    }

    fn ensure_started(&mut self) -> Result<(), EspError> {
        if !self.started {
            self.wifi.start()?;
            self.started = true;
        }
        Ok(())
    }

    fn apply_static_addressing(&mut self, settings: &Settings) -> Result<(), NetError> {
        let ip: Ipv4Addr = parse_addr("static address", &settings.static_address)?;
        let gateway: Ipv4Addr = parse_addr("gateway", &settings.gateway)?;
        let netmask: Ipv4Addr = parse_addr("netmask", &settings.netmask)?;
        let mask = Mask(u32::from(netmask).leading_ones() as u8);

        // DNS is optional with static addressing.
        let dns = if settings.dns.is_empty() {
            None
        } else {
            Some(parse_addr("dns", &settings.dns)?)
        };

        let conf = NetifConfiguration {
            ip_configuration: Some(IpConfiguration::Client(IpClientConfiguration::Fixed(
                ClientSettings {
                    ip,
                    subnet: Subnet { gateway, mask },
                    dns,
                    secondary_dns: None,
                },
            ))),
            ..NetifConfiguration::wifi_default_client()
        };
        let netif = EspNetif::new_with_conf(&conf).map_err(esp_err)?;
        self.wifi.swap_netif_sta(netif).map_err(esp_err)?;
        debug!("Applied static addressing {}", settings.static_address);
        Ok(())
    }
}

impl WifiLink for EspWifiLink<'_> {
    fn is_associated(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn scan_for(&mut self, ssid: &str) -> Result<bool, NetError> {
        self.ensure_started().map_err(esp_err)?;
        let access_points = self.wifi.scan().map_err(esp_err)?;
        debug!("Scan found {} access points", access_points.len());
        Ok(access_points.iter().any(|ap| ap.ssid == ssid))
    }

    fn begin_association(&mut self, settings: &Settings) -> Result<(), NetError> {
        if !settings.static_address.is_empty() {
            self.apply_static_addressing(settings)?;
        }

        let conf = Configuration::Client(ClientConfiguration {
            ssid: settings
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| NetError::Association("SSID too long".into()))?,
            password: settings
                .wifi_password
                .as_str()
                .try_into()
                .map_err(|_| NetError::Association("password too long".into()))?,
            auth_method: AuthMethod::WPA2Personal,
            ..Default::default()
        });

        self.wifi.set_configuration(&conf).map_err(esp_err)?;
        self.ensure_started().map_err(esp_err)?;
        // Returns as soon as the attempt is underway; completion shows up
        // through is_associated() on later ticks.
        self.wifi.connect().map_err(esp_err)?;
        Ok(())
    }

    fn local_ip(&self) -> Option<String> {
        if !self.is_associated() {
            return None;
        }
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip.to_string())
    }
}

fn parse_addr(field: &str, value: &str) -> Result<Ipv4Addr, NetError> {
    value
        .parse()
        .map_err(|_| NetError::Association(format!("invalid {} \"{}\"", field, value)))
}

fn esp_err(e: EspError) -> NetError {
    NetError::Association(format!("{:?}", e))
}
