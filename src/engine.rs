//! The energy-dispatch algorithm: a deterministic, state-carrying
//! decision engine over a rolling horizon of aligned weather/price samples.
//!
//! A small config struct plus a per-interval simulation function and a dedicated
//! `Action` enum. The dispatch rule itself is a fixed, deterministic rule table rather
//! than a DP or greedy search — forecast error-modeling beyond a deterministic
//! transform is out of scope here.

use tracing::warn;

use crate::domain::{Action, BatteryConfig, ConsumptionProfile, Plan, PlanInterval, PriceSample, SolarConfig, WeatherSample};

/// Empirical derate factor for solar output (cabling, inverter, soiling).
const PERFORMANCE_RATIO: f64 = 0.75;

/// Deterministic dispatch-plan engine. One instance is constructed per plan run;
/// `soc_pct` is the only piece of state it carries, seeded from
/// `BatteryConfig::current_soc_pct` and mutated across intervals.
pub struct PlanEngine {
    solar: SolarConfig,
    battery: BatteryConfig,
    consumption: ConsumptionProfile,
    price_threshold_sek_per_kwh: f64,
    soc_pct: f64,
}

impl PlanEngine {
    pub fn new(
        solar: SolarConfig,
        battery: BatteryConfig,
        consumption: ConsumptionProfile,
        price_threshold_sek_per_kwh: f64,
    ) -> Self {
        let soc_pct = battery.current_soc_pct;
        Self {
            solar,
            battery,
            consumption,
            price_threshold_sek_per_kwh,
            soc_pct,
        }
    }

    /// Runs the plan over `N = min(len(weather), len(prices))` intervals. Never fails:
    /// `N = 0` yields a fully empty [`Plan`], and any other input yields the complete
    /// prefix.
    pub fn run(&mut self, weather: &[WeatherSample], prices: &[PriceSample]) -> Plan {
        let n = weather.len().min(prices.len());
        let mut plan = Plan::default();
        plan.entries.reserve(n);

        for i in 0..n {
            let entry = self.step(&weather[i], &prices[i]);
            plan.total_cost_sek += entry.estimated_cost_sek;
            if entry.grid_flow_kwh > 0.0 {
                plan.total_import_kwh += entry.grid_flow_kwh;
            } else {
                plan.total_export_kwh += -entry.grid_flow_kwh;
            }
            plan.entries.push(entry);
        }

        plan
    }

    fn step(&mut self, weather: &WeatherSample, price: &PriceSample) -> PlanInterval {
        let production = self.production_kwh(weather);
        // consumption(i) = base_load_kW, held constant as a placeholder for a more
        // elaborate profile. The kW rate is treated as a one-interval kWh value and
        // left unscaled; the units mismatch is intentional, not silently corrected.
        let consumption = self.consumption.base_load_kw;
        let surplus = production - consumption;
        let spot_price = price.price_sek_per_kwh;

        let (action, grid_flow, battery_flow, cost) = if surplus > 0.0 {
            self.dispatch_surplus(surplus, spot_price)
        } else {
            self.dispatch_deficit(-surplus, spot_price)
        };

        PlanInterval {
            timestamp: weather.timestamp,
            action,
            production_kwh: production,
            consumption_kwh: consumption,
            grid_flow_kwh: grid_flow,
            battery_flow_kwh: battery_flow,
            spot_price,
            estimated_cost_sek: cost,
            battery_soc_pct: self.soc_pct,
        }
    }

    /// `surplus > 0` branch of the decision table.
    fn dispatch_surplus(&mut self, surplus: f64, price: f64) -> (Action, f64, f64, f64) {
        if price > self.price_threshold_sek_per_kwh {
            // grid_flow > 0 = import; export is represented as negative grid_flow.
            return (Action::SellToGrid, -surplus, 0.0, -surplus * price);
        }

        if self.battery.capacity_kwh > 0.0 && self.soc_pct < self.battery.max_soc_pct {
            // `max_charge_kw` is treated as a per-interval kWh cap rather than a rate
            // divided by an interval-length factor.
            let charge = surplus.min(self.battery.max_charge_kw);
            let grid_flow = surplus - charge;
            self.soc_pct += 100.0 * charge / self.battery.capacity_kwh;
            return (Action::ChargeBattery, grid_flow, charge, 0.0);
        }

        // capacity == 0 or battery full: CHARGE degrades to DIRECT_USE.
        (Action::DirectUse, 0.0, 0.0, 0.0)
    }

    /// `surplus <= 0` branch of the decision table; `deficit = -surplus`.
    fn dispatch_deficit(&mut self, deficit: f64, price: f64) -> (Action, f64, f64, f64) {
        if price > self.price_threshold_sek_per_kwh
            && self.battery.capacity_kwh > 0.0
            && self.soc_pct > self.battery.min_soc_pct
        {
            let discharge = deficit.min(self.battery.max_discharge_kw);
            let grid_flow = deficit - discharge;
            self.soc_pct -= 100.0 * discharge / self.battery.capacity_kwh;
            return (Action::DischargeBattery, grid_flow, -discharge, grid_flow * price);
        }

        // capacity == 0 degrades DISCHARGE to BUY.
        (Action::BuyFromGrid, deficit, 0.0, deficit * price)
    }

    /// `production(i) = area * efficiency * (irradiance_i / 1000) * PR * tau(temp_i)`.
    fn production_kwh(&self, weather: &WeatherSample) -> f64 {
        let tau = temperature_derate(weather.temperature_c);
        self.solar.panel_area_m2
            * self.solar.panel_efficiency
            * (weather.solar_irradiance_w_per_m2 / 1000.0)
            * PERFORMANCE_RATIO
            * tau
    }
}

/// `tau(T) = clamp(1 - 0.005*(T - 25), 0.5, 1.2)`. The clamp bounds
/// are a hard floor/ceiling that must be preserved byte-exactly — not loosened into a soft rescale.
fn temperature_derate(temp_c: f64) -> f64 {
    let tau = 1.0 - 0.005 * (temp_c - 25.0);
    if !(0.5..=1.2).contains(&tau) {
        warn!(temp_c, tau, "temperature derate clamped to engine bounds");
    }
    tau.clamp(0.5, 1.2)
}
