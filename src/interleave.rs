use crate::rate::Modulation;

/// Block interleaver for one OFDM symbol. The first permutation spreads adjacent coded bits over
/// non-adjacent subcarriers, the second alternates them between more and less significant
/// constellation bits.
#[derive(Clone, Debug)]
pub struct Interleaver {
    /// `table[k]` is where coded bit `k` ends up after interleaving
    table: Vec<usize>,
}

impl Interleaver {
    pub fn new(modulation: Modulation) -> Self {
        let ncbps = modulation.coded_bits_per_symbol();
        let s = std::cmp::max(modulation.bits_per_subcarrier() / 2, 1);
        let table = (0..ncbps)
            .map(|k| {
                let i = (ncbps / 16) * (k % 16) + k / 16;
                s * (i / s) + (i + ncbps - (16 * i) / ncbps) % s
            })
            .collect();
        Self { table }
    }

    /// Coded bits per symbol this interleaver works on
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn interleave<T: Copy + Default>(&self, input: &[T]) -> Vec<T> {
        assert_eq!(input.len(), self.table.len());
        let mut res = vec![T::default(); input.len()];
        for (k, j) in self.table.iter().enumerate() {
            res[*j] = input[k];
        }
        res
    }

    pub fn deinterleave<T: Copy>(&self, input: &[T]) -> Vec<T> {
        assert_eq!(input.len(), self.table.len());
        self.table.iter().map(|j| input[*j]).collect()
    }
}

/// One interleaver per modulation, computed once and shared by every packet
#[derive(Clone, Debug)]
pub struct InterleaverSet {
    tables: Vec<Interleaver>,
}

impl InterleaverSet {
    pub fn new() -> Self {
        Self {
            tables: Modulation::ALL.iter().map(|m| Interleaver::new(*m)).collect(),
        }
    }

    pub fn get(&self, modulation: Modulation) -> &Interleaver {
        let idx = Modulation::ALL
            .iter()
            .position(|m| *m == modulation)
            .unwrap_or(0);
        &self.tables[idx]
    }
}

impl Default for InterleaverSet {
    fn default() -> Self {
        Self::new()
    }
}
