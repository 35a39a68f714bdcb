use serde::{Deserialize, Serialize};
use std::fmt;

/// Industry group used to roll money flow up across tickers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Banking,
    RealEstate,
    Steel,
    Food,
    Retail,
    OilGas,
    Power,
    Construction,
    Securities,
    Technology,
    Aviation,
    Logistics,
    Pharma,
    Rubber,
    Seafood,
    Agriculture,
    Transportation,
    /// Tickers missing from the sector table
    Other,
}

/// Ticker → sector assignments for the commonly traded HOSE/HNX names
const SECTOR_TABLE: &[(&str, Sector)] = &[
    ("VCB", Sector::Banking),
    ("TCB", Sector::Banking),
    ("MBB", Sector::Banking),
    ("VPB", Sector::Banking),
    ("ACB", Sector::Banking),
    ("CTG", Sector::Banking),
    ("BID", Sector::Banking),
    ("STB", Sector::Banking),
    ("HDB", Sector::Banking),
    ("TPB", Sector::Banking),
    ("SHB", Sector::Banking),
    ("EIB", Sector::Banking),
    ("MSB", Sector::Banking),
    ("OCB", Sector::Banking),
    ("VIB", Sector::Banking),
    ("LPB", Sector::Banking),
    ("SSB", Sector::Banking),
    ("BAB", Sector::Banking),
    ("NVB", Sector::Banking),
    ("ABB", Sector::Banking),
    ("VHM", Sector::RealEstate),
    ("VIC", Sector::RealEstate),
    ("NVL", Sector::RealEstate),
    ("PDR", Sector::RealEstate),
    ("DXG", Sector::RealEstate),
    ("DIG", Sector::RealEstate),
    ("NLG", Sector::RealEstate),
    ("KDH", Sector::RealEstate),
    ("HDG", Sector::RealEstate),
    ("CEO", Sector::RealEstate),
    ("BCM", Sector::RealEstate),
    ("HDC", Sector::RealEstate),
    ("KBC", Sector::RealEstate),
    ("DXS", Sector::RealEstate),
    ("SCR", Sector::RealEstate),
    ("IDC", Sector::RealEstate),
    ("HPG", Sector::Steel),
    ("HSG", Sector::Steel),
    ("NKG", Sector::Steel),
    ("POM", Sector::Steel),
    ("TLH", Sector::Steel),
    ("VIS", Sector::Steel),
    ("VNM", Sector::Food),
    ("MSN", Sector::Food),
    ("SAB", Sector::Food),
    ("MCH", Sector::Food),
    ("KDC", Sector::Food),
    ("QNS", Sector::Food),
    ("LSS", Sector::Food),
    ("MWG", Sector::Retail),
    ("FRT", Sector::Retail),
    ("PNJ", Sector::Retail),
    ("DGW", Sector::Retail),
    ("VGC", Sector::Retail),
    ("GAS", Sector::OilGas),
    ("PLX", Sector::OilGas),
    ("PVD", Sector::OilGas),
    ("PVS", Sector::OilGas),
    ("PVG", Sector::OilGas),
    ("POW", Sector::Power),
    ("NT2", Sector::Power),
    ("PC1", Sector::Power),
    ("REE", Sector::Power),
    ("CTD", Sector::Construction),
    ("HBC", Sector::Construction),
    ("FCN", Sector::Construction),
    ("LCG", Sector::Construction),
    ("HT1", Sector::Construction),
    ("VCG", Sector::Construction),
    ("SSI", Sector::Securities),
    ("VCI", Sector::Securities),
    ("VND", Sector::Securities),
    ("HCM", Sector::Securities),
    ("FTS", Sector::Securities),
    ("MBS", Sector::Securities),
    ("VIX", Sector::Securities),
    ("AGR", Sector::Securities),
    ("SHS", Sector::Securities),
    ("FPT", Sector::Technology),
    ("CMG", Sector::Technology),
    ("VGI", Sector::Technology),
    ("ITD", Sector::Technology),
    ("HVN", Sector::Aviation),
    ("VJC", Sector::Aviation),
    ("HAH", Sector::Logistics),
    ("TCL", Sector::Logistics),
    ("DHG", Sector::Pharma),
    ("DMC", Sector::Pharma),
    ("IMP", Sector::Pharma),
    ("DCL", Sector::Pharma),
    ("GVR", Sector::Rubber),
    ("DPR", Sector::Rubber),
    ("PHR", Sector::Rubber),
    ("VHC", Sector::Seafood),
    ("ANV", Sector::Seafood),
    ("IDI", Sector::Seafood),
    ("HAG", Sector::Agriculture),
    ("HNG", Sector::Agriculture),
    ("SBT", Sector::Agriculture),
    ("PVT", Sector::Transportation),
    ("VSC", Sector::Transportation),
    ("GMD", Sector::Transportation),
];

impl Sector {
    /// Sector of a ticker; [`Sector::Other`] when it is not in the table
    pub fn of(ticker: &str) -> Sector {
        let ticker = ticker.trim().to_uppercase();
        SECTOR_TABLE
            .iter()
            .find(|(symbol, _)| *symbol == ticker)
            .map(|(_, sector)| *sector)
            .unwrap_or(Sector::Other)
    }

    /// Tickers assigned to this sector, in table order
    pub fn tickers(&self) -> Vec<&'static str> {
        SECTOR_TABLE
            .iter()
            .filter(|(_, sector)| sector == self)
            .map(|(symbol, _)| *symbol)
            .collect()
    }

    /// Every sector that has tickers, sorted by name
    pub fn all() -> Vec<Sector> {
        let mut sectors: Vec<Sector> = SECTOR_TABLE.iter().map(|(_, s)| *s).collect();
        sectors.sort_by_key(|s| s.name());
        sectors.dedup();
        sectors
    }

    /// Storage key ("real_estate")
    pub fn key(&self) -> &'static str {
        match self {
            Sector::Banking => "banking",
            Sector::RealEstate => "real_estate",
            Sector::Steel => "steel",
            Sector::Food => "food",
            Sector::Retail => "retail",
            Sector::OilGas => "oil_gas",
            Sector::Power => "power",
            Sector::Construction => "construction",
            Sector::Securities => "securities",
            Sector::Technology => "technology",
            Sector::Aviation => "aviation",
            Sector::Logistics => "logistics",
            Sector::Pharma => "pharma",
            Sector::Rubber => "rubber",
            Sector::Seafood => "seafood",
            Sector::Agriculture => "agriculture",
            Sector::Transportation => "transportation",
            Sector::Other => "other",
        }
    }

    pub fn from_key(key: &str) -> Option<Sector> {
        Sector::all()
            .into_iter()
            .chain(std::iter::once(Sector::Other))
            .find(|s| s.key() == key)
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Sector::Banking => "Banking",
            Sector::RealEstate => "Real Estate",
            Sector::Steel => "Steel",
            Sector::Food => "Food & Beverage",
            Sector::Retail => "Retail",
            Sector::OilGas => "Oil & Gas",
            Sector::Power => "Power",
            Sector::Construction => "Construction",
            Sector::Securities => "Securities",
            Sector::Technology => "Technology",
            Sector::Aviation => "Aviation",
            Sector::Logistics => "Logistics",
            Sector::Pharma => "Pharmaceutical",
            Sector::Rubber => "Rubber",
            Sector::Seafood => "Seafood",
            Sector::Agriculture => "Agriculture",
            Sector::Transportation => "Transportation",
            Sector::Other => "Other",
        }
    }

    /// Vietnamese name used in notifications
    pub fn name_vi(&self) -> &'static str {
        match self {
            Sector::Banking => "Ngân hàng",
            Sector::RealEstate => "Bất động sản",
            Sector::Steel => "Thép",
            Sector::Food => "Thực phẩm",
            Sector::Retail => "Bán lẻ",
            Sector::OilGas => "Dầu khí",
            Sector::Power => "Điện",
            Sector::Construction => "Xây dựng",
            Sector::Securities => "Chứng khoán",
            Sector::Technology => "Công nghệ",
            Sector::Aviation => "Hàng không",
            Sector::Logistics => "Logistics",
            Sector::Pharma => "Dược phẩm",
            Sector::Rubber => "Cao su",
            Sector::Seafood => "Thủy sản",
            Sector::Agriculture => "Nông nghiệp",
            Sector::Transportation => "Vận tải",
            Sector::Other => "Khác",
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sector_lookup() {
        assert_eq!(Sector::of("VCB"), Sector::Banking);
        assert_eq!(Sector::of(" hpg "), Sector::Steel);
        assert_eq!(Sector::of("VHC"), Sector::Seafood);
        assert_eq!(Sector::of("GMD"), Sector::Transportation);
        assert_eq!(Sector::of("ZZZ"), Sector::Other);
        assert_eq!(Sector::of("VNINDEX"), Sector::Other);
    }

    #[test]
    fn test_table_has_no_duplicate_tickers() {
        let mut seen = HashSet::new();
        for (ticker, _) in SECTOR_TABLE {
            assert!(seen.insert(*ticker), "{} listed twice", ticker);
        }
    }

    #[test]
    fn test_keys_round_trip() {
        for sector in Sector::all().into_iter().chain([Sector::Other]) {
            assert_eq!(Sector::from_key(sector.key()), Some(sector));
        }
        assert_eq!(Sector::from_key("unknown"), None);
    }

    #[test]
    fn test_tickers_by_sector() {
        assert_eq!(Sector::Aviation.tickers(), vec!["HVN", "VJC"]);
        assert!(Sector::Other.tickers().is_empty());
        assert!(!Sector::all().contains(&Sector::Other));
    }
}
