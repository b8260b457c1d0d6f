use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Modulation {
    Bpsk,
    Qpsk,
    Qam16,
    Qam64,
}

impl Modulation {
    pub const ALL: [Modulation; 4] = [
        Modulation::Bpsk,
        Modulation::Qpsk,
        Modulation::Qam16,
        Modulation::Qam64,
    ];

    /// Coded bits per subcarrier (N_BPSC)
    pub fn bits_per_subcarrier(self) -> usize {
        match self {
            Modulation::Bpsk => 1,
            Modulation::Qpsk => 2,
            Modulation::Qam16 => 4,
            Modulation::Qam64 => 6,
        }
    }

    /// Coded bits per OFDM symbol (N_CBPS)
    pub fn coded_bits_per_symbol(self) -> usize {
        48 * self.bits_per_subcarrier()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CodeRate {
    Half,
    TwoThirds,
    ThreeQuarters,
}

impl CodeRate {
    /// Which of the rate 1/2 mother code outputs (A0 B0 A1 B1 ...) are transmitted, repeated
    /// cyclically
    pub fn puncture_pattern(self) -> &'static [bool] {
        match self {
            CodeRate::Half => &[true, true],
            CodeRate::TwoThirds => &[true, true, true, false],
            CodeRate::ThreeQuarters => &[true, true, true, false, false, true],
        }
    }
}

/// The eight 802.11a/g data rates (at 20 MHz)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Rate {
    Mbps6,
    Mbps9,
    Mbps12,
    Mbps18,
    Mbps24,
    Mbps36,
    Mbps48,
    Mbps54,
}

impl Rate {
    pub const ALL: [Rate; 8] = [
        Rate::Mbps6,
        Rate::Mbps9,
        Rate::Mbps12,
        Rate::Mbps18,
        Rate::Mbps24,
        Rate::Mbps36,
        Rate::Mbps48,
        Rate::Mbps54,
    ];

    /// Look up the rate from the four RATE bits of the SIGNAL field (R1 is the MSB)
    pub fn from_signal_bits(bits: u8) -> Option<Rate> {
        Rate::ALL.iter().cloned().find(|r| r.signal_bits() == bits)
    }

    pub fn signal_bits(self) -> u8 {
        match self {
            Rate::Mbps6 => 0b1101,
            Rate::Mbps9 => 0b1111,
            Rate::Mbps12 => 0b0101,
            Rate::Mbps18 => 0b0111,
            Rate::Mbps24 => 0b1001,
            Rate::Mbps36 => 0b1011,
            Rate::Mbps48 => 0b0001,
            Rate::Mbps54 => 0b0011,
        }
    }

    pub fn from_mbps(mbps: u32) -> Option<Rate> {
        Rate::ALL.iter().cloned().find(|r| r.mbps() == mbps)
    }

    pub fn mbps(self) -> u32 {
        match self {
            Rate::Mbps6 => 6,
            Rate::Mbps9 => 9,
            Rate::Mbps12 => 12,
            Rate::Mbps18 => 18,
            Rate::Mbps24 => 24,
            Rate::Mbps36 => 36,
            Rate::Mbps48 => 48,
            Rate::Mbps54 => 54,
        }
    }

    pub fn modulation(self) -> Modulation {
        match self {
            Rate::Mbps6 | Rate::Mbps9 => Modulation::Bpsk,
            Rate::Mbps12 | Rate::Mbps18 => Modulation::Qpsk,
            Rate::Mbps24 | Rate::Mbps36 => Modulation::Qam16,
            Rate::Mbps48 | Rate::Mbps54 => Modulation::Qam64,
        }
    }

    pub fn code_rate(self) -> CodeRate {
        match self {
            Rate::Mbps6 | Rate::Mbps12 | Rate::Mbps24 => CodeRate::Half,
            Rate::Mbps48 => CodeRate::TwoThirds,
            _ => CodeRate::ThreeQuarters,
        }
    }

    /// Coded bits per OFDM symbol (N_CBPS)
    pub fn coded_bits_per_symbol(self) -> usize {
        self.modulation().coded_bits_per_symbol()
    }

    /// Data bits per OFDM symbol (N_DBPS)
    pub fn data_bits_per_symbol(self) -> usize {
        let ncbps = self.coded_bits_per_symbol();
        match self.code_rate() {
            CodeRate::Half => ncbps / 2,
            CodeRate::TwoThirds => ncbps * 2 / 3,
            CodeRate::ThreeQuarters => ncbps * 3 / 4,
        }
    }

    /// Number of DATA symbols carrying a PSDU of `length` bytes: SERVICE (16 bits), PSDU and six
    /// tail bits, rounded up to whole symbols
    pub fn num_symbols(self, length: usize) -> usize {
        let ndbps = self.data_bits_per_symbol();
        (16 + 8 * length + 6 + ndbps - 1) / ndbps
    }
}
