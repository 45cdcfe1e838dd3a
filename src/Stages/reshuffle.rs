// GPU-native correlation layouts → canonical upper-triangle product order
//
// The correlation kernels emit int32 (real, imag) pairs in whatever layout
// the device prefers: a full 32-input matrix for small arrays, packed
// upper-triangle blocks otherwise. These routines fold either layout into
// the canonical order used by every downstream consumer: frequency-major,
// row-major upper triangle over remapped element indices.

use super::output_frame::ComplexInt;

/// Inputs the small-array kernel correlates regardless of how many elements
/// are actually connected.
pub const SMALL_KERNEL_INPUTS: usize = 32;

/// Index of product (row, col), row ≤ col, in the row-major upper triangle
/// of an `n`-element correlation matrix.
#[inline]
pub fn triangle_index(row: usize, col: usize, n: usize) -> usize {
    debug_assert!(row <= col && col < n);
    row * (2 * n - row + 1) / 2 + (col - row)
}

/// Number of distinct products for `n` elements.
#[inline]
pub fn num_triangle_products(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Rearrange a 32-input kernel dump into a full `num_elements` matrix with
/// the product remap applied.
///
/// `src` holds `num_local_freq` full 32×32 matrices of int32 pairs, the
/// connected elements on inputs `0..num_elements`. `full` receives
/// `num_local_freq` dense `num_elements²` matrices in canonical element
/// order, `full[f][remap[e1]][remap[e2]] = src[f][e1][e2]`.
pub fn reorganize_32_to_16_element(
    num_local_freq: usize,
    num_elements: usize,
    src: &[i32],
    full: &mut [ComplexInt],
    product_remap: &[usize],
) {
    assert!(num_elements <= 16);
    assert_eq!(
        src.len(),
        num_local_freq * SMALL_KERNEL_INPUTS * SMALL_KERNEL_INPUTS * 2
    );
    assert_eq!(full.len(), num_local_freq * num_elements * num_elements);
    assert_eq!(product_remap.len(), num_elements);

    let src_stride = SMALL_KERNEL_INPUTS * SMALL_KERNEL_INPUTS * 2;
    for f in 0..num_local_freq {
        let src_matrix = &src[f * src_stride..(f + 1) * src_stride];
        let full_matrix =
            &mut full[f * num_elements * num_elements..(f + 1) * num_elements * num_elements];
        for e1 in 0..num_elements {
            for e2 in 0..num_elements {
                let s = (e1 * SMALL_KERNEL_INPUTS + e2) * 2;
                full_matrix[product_remap[e1] * num_elements + product_remap[e2]] = ComplexInt {
                    real: src_matrix[s],
                    imag: src_matrix[s + 1],
                };
            }
        }
    }
}

/// Extract the row-major upper triangle from full per-frequency matrices.
pub fn full_matrix_to_upper_triangle(
    num_local_freq: usize,
    num_elements: usize,
    full: &[ComplexInt],
    out: &mut [ComplexInt],
) {
    let num_vis = num_triangle_products(num_elements);
    assert_eq!(full.len(), num_local_freq * num_elements * num_elements);
    assert_eq!(out.len(), num_local_freq * num_vis);

    for f in 0..num_local_freq {
        let full_matrix = &full[f * num_elements * num_elements..(f + 1) * num_elements * num_elements];
        let out_tri = &mut out[f * num_vis..(f + 1) * num_vis];
        for row in 0..num_elements {
            for col in row..num_elements {
                out_tri[triangle_index(row, col, num_elements)] =
                    full_matrix[row * num_elements + col];
            }
        }
    }
}

/// Fold the blocked kernel layout into the canonical upper triangle with the
/// product remap applied.
///
/// `gpu_data` holds, per frequency, `num_blocks` tiles of
/// `block_size × block_size` int32 pairs covering the block pairs
/// `(x, y), x ≤ y` in row-major block order. Tile entry `(i, j)` is the
/// product of elements `x·bs + i` and `y·bs + j`. A remap that swaps product
/// order lands the conjugate value, keeping the triangle consistent.
pub fn reorganize_gpu_to_upper_triangle_remap(
    block_size: usize,
    num_blocks: usize,
    num_local_freq: usize,
    num_elements: usize,
    gpu_data: &[i32],
    out: &mut [ComplexInt],
    product_remap: &[usize],
) {
    let num_vis = num_triangle_products(num_elements);
    let blocks_per_side = num_elements / block_size;
    assert_eq!(num_elements % block_size, 0);
    assert_eq!(num_blocks, blocks_per_side * (blocks_per_side + 1) / 2);
    assert_eq!(
        gpu_data.len(),
        num_local_freq * num_blocks * block_size * block_size * 2
    );
    assert_eq!(out.len(), num_local_freq * num_vis);
    assert_eq!(product_remap.len(), num_elements);

    let tile_words = block_size * block_size * 2;
    for f in 0..num_local_freq {
        let freq_data = &gpu_data[f * num_blocks * tile_words..(f + 1) * num_blocks * tile_words];
        let out_tri = &mut out[f * num_vis..(f + 1) * num_vis];

        let mut block = 0;
        for x in 0..blocks_per_side {
            for y in x..blocks_per_side {
                let tile = &freq_data[block * tile_words..(block + 1) * tile_words];
                for i in 0..block_size {
                    let e1 = x * block_size + i;
                    for j in 0..block_size {
                        let e2 = y * block_size + j;
                        if e1 > e2 {
                            // Lower-triangle duplicate inside a diagonal tile.
                            continue;
                        }
                        let s = (i * block_size + j) * 2;
                        let (real, imag) = (tile[s], tile[s + 1]);
                        let (r1, r2) = (product_remap[e1], product_remap[e2]);
                        if r1 <= r2 {
                            out_tri[triangle_index(r1, r2, num_elements)] =
                                ComplexInt { real, imag };
                        } else {
                            out_tri[triangle_index(r2, r1, num_elements)] =
                                ComplexInt { real, imag: -imag };
                        }
                    }
                }
                block += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_index_is_dense_and_ordered() {
        let n = 5;
        let mut seen = vec![false; num_triangle_products(n)];
        for row in 0..n {
            for col in row..n {
                let idx = triangle_index(row, col, n);
                assert!(!seen[idx]);
                seen[idx] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(triangle_index(0, 0, n), 0);
        assert_eq!(triangle_index(n - 1, n - 1, n), num_triangle_products(n) - 1);
    }

    #[test]
    fn blocked_reshuffle_identity_remap() {
        // 4 elements, 2x2 blocks: tiles (0,0), (0,1), (1,1).
        let (bs, ne, nb) = (2, 4, 3);
        let remap: Vec<usize> = (0..ne).collect();
        let mut gpu = vec![0i32; nb * bs * bs * 2];
        // Encode each product as real = 10*e1 + e2 so results are readable.
        let mut block = 0;
        for x in 0..2 {
            for y in x..2 {
                for i in 0..bs {
                    for j in 0..bs {
                        let (e1, e2) = (x * bs + i, y * bs + j);
                        let s = (block * bs * bs + i * bs + j) * 2;
                        gpu[s] = (10 * e1 + e2) as i32;
                        gpu[s + 1] = 1;
                    }
                }
                block += 1;
            }
        }
        let mut out = vec![ComplexInt::default(); num_triangle_products(ne)];
        reorganize_gpu_to_upper_triangle_remap(bs, nb, 1, ne, &gpu, &mut out, &remap);
        for row in 0..ne {
            for col in row..ne {
                let got = out[triangle_index(row, col, ne)];
                assert_eq!(got.real, (10 * row + col) as i32);
                assert_eq!(got.imag, 1);
            }
        }
    }

    #[test]
    fn blocked_reshuffle_swapping_remap_conjugates() {
        let (bs, ne, nb) = (2, 2, 1);
        // Swap the two elements: product (0,1) must land as conj at (0,1).
        let remap = vec![1, 0];
        #[rustfmt::skip]
        let gpu = vec![
            5, 0,   // (0,0)
            7, 3,   // (0,1)
            0, 0,   // (1,0) ignored
            9, 0,   // (1,1)
        ];
        let mut out = vec![ComplexInt::default(); 3];
        reorganize_gpu_to_upper_triangle_remap(bs, nb, 1, ne, &gpu, &mut out, &remap);
        // Autos swap places.
        assert_eq!(out[triangle_index(0, 0, ne)].real, 9);
        assert_eq!(out[triangle_index(1, 1, ne)].real, 5);
        // Cross product (0,1) remaps to (1,0) and conjugates.
        assert_eq!(out[triangle_index(0, 1, ne)], ComplexInt { real: 7, imag: -3 });
    }

    #[test]
    fn small_kernel_path_matches_hand_computation() {
        let (nlf, ne) = (1, 3);
        let remap = vec![2, 0, 1];
        let mut src = vec![0i32; nlf * SMALL_KERNEL_INPUTS * SMALL_KERNEL_INPUTS * 2];
        for e1 in 0..ne {
            for e2 in 0..ne {
                let s = (e1 * SMALL_KERNEL_INPUTS + e2) * 2;
                src[s] = (100 * e1 + e2) as i32;
                src[s + 1] = (e1 + e2) as i32;
            }
        }
        let mut full = vec![ComplexInt::default(); nlf * ne * ne];
        reorganize_32_to_16_element(nlf, ne, &src, &mut full, &remap);
        let mut out = vec![ComplexInt::default(); num_triangle_products(ne)];
        full_matrix_to_upper_triangle(nlf, ne, &full, &mut out);

        // Canonical product (r1, r2) comes from kernel inputs with
        // remap[e] = r, i.e. e = remap^-1[r].
        let inverse = vec![1usize, 2, 0];
        for r1 in 0..ne {
            for r2 in r1..ne {
                let (e1, e2) = (inverse[r1], inverse[r2]);
                let got = out[triangle_index(r1, r2, ne)];
                assert_eq!(got.real, (100 * e1 + e2) as i32);
                assert_eq!(got.imag, (e1 + e2) as i32);
            }
        }
    }
}
